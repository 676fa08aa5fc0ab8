//! Graceful shutdown coordination via `CancellationToken`.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Owns the engine's cancellation token and every task it spawns.
///
/// Long-lived sweepers are registered as handles; per-channel reader, writer
/// and dispatch tasks go through the tracker.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Keep a background task's handle to await on shutdown.
    pub fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().push(handle);
    }

    /// Tracked tasks still running.
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel, then wait up to `timeout` for everything to finish.
    /// Returns `false` if the timeout elapsed first.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> bool {
        self.shutdown();
        self.tracker.close();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        info!(
            background = handles.len(),
            tracked = self.tracker.len(),
            timeout_ms = timeout.as_millis() as u64,
            "waiting for tasks to complete"
        );

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.tracker.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_is_idempotent_and_propagates() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let child = token.child_token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_and_registered() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        let _ = coord.spawn(async move { t1.cancelled().await });
        coord.register(tokio::spawn(async move { t2.cancelled().await }));
        assert_eq!(coord.task_count(), 1);

        assert!(coord.graceful_shutdown(Duration::from_secs(5)).await);
        assert_eq!(coord.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        let _ = coord.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!coord.graceful_shutdown(Duration::from_millis(100)).await);
    }
}
