//! Pending calls awaiting a response, with deadline sweeping.
//!
//! Every registered callback fires exactly once: with the matching response,
//! a synthetic timeout, or a synthetic failure when it is displaced or the
//! send never happened. The map lock is never held while a callback runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use sockrpc_core::envelope::STATUS_SUPERSEDED;
use sockrpc_core::{MessageId, ProtocolFault, Response};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

struct PendingCall {
    callback: Callback,
    deadline: Instant,
}

#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<MessageId, PendingCall>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a pending call expiring `ttl` from now. A call already
    /// waiting under the same id is displaced and told so.
    pub fn register(&self, id: MessageId, callback: Callback, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        let displaced = self
            .pending
            .lock()
            .insert(id.clone(), PendingCall { callback, deadline });
        if let Some(old) = displaced {
            warn!(msg_id = %id, "pending call displaced by a new call with the same id");
            (old.callback)(Response::failure(id, STATUS_SUPERSEDED, "superseded"));
        }
    }

    /// Complete the pending call matching `response.id`. The callback runs on
    /// its own task when a runtime is available.
    pub fn resolve(&self, response: Response) -> bool {
        let entry = self.pending.lock().remove(&response.id);
        match entry {
            Some(call) => {
                fire(call.callback, response);
                true
            }
            None => {
                let fault = ProtocolFault::OrphanResponse(response.id.to_string());
                counter!("sockrpc_orphan_responses_total").increment(1);
                warn!(msg_id = %response.id, kind = fault.error_kind(), "{fault}");
                false
            }
        }
    }

    /// Take a pending call back out without invoking it.
    pub fn remove(&self, id: &MessageId) -> Option<Callback> {
        self.pending.lock().remove(id).map(|call| call.callback)
    }

    /// Expire every call whose deadline is at or before `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<(MessageId, PendingCall)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<MessageId> = pending
                .iter()
                .filter(|(_, call)| call.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|call| (id, call)))
                .collect()
        };
        let count = expired.len();
        for (id, call) in expired {
            let fault = ProtocolFault::CallTimeout(id.to_string());
            counter!("sockrpc_call_timeouts_total").increment(1);
            debug!(msg_id = %id, kind = fault.error_kind(), "pending call expired");
            (call.callback)(Response::timeout(id));
        }
        count
    }

    /// Time out everything still pending.
    pub fn expire_all(&self) -> usize {
        let drained: Vec<(MessageId, PendingCall)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            (call.callback)(Response::timeout(id));
        }
        count
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

fn fire(callback: Callback, response: Response) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let _ = handle.spawn(async move { callback(response) });
        }
        Err(_) => callback(response),
    }
}

/// Sweep `registry` every `interval` until `cancel` fires.
pub fn start_sweeper(
    registry: Arc<CorrelationRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let expired = registry.sweep(Instant::now());
                    if expired > 0 {
                        debug!(expired, "correlation sweep");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}
