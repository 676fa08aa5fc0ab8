//! Heartbeat handling and idle-channel detection.

use std::sync::Arc;
use std::time::Duration;

use sockrpc_core::envelope::STATUS_OK;
use sockrpc_core::Request;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::engine::Engine;
use crate::handler::HandlerRegistry;
use crate::registry::ConnectionRegistry;

/// Reserved heartbeat handler name.
pub const HEARTBEAT_HANDLER: &str = "Health";
/// Reserved heartbeat method name.
pub const HEARTBEAT_METHOD: &str = "Index";
/// Close reason for channels dropped by the idle sweep.
pub const IDLE_CLOSE_REASON: &str = "timeout";

/// Register the `Health`/`Index` handler: it refreshes the channel's
/// activity time and answers success.
pub(crate) fn install_heartbeat(handlers: &HandlerRegistry, show_logs: bool) {
    handlers.register_fn(HEARTBEAT_HANDLER, HEARTBEAT_METHOD, move |ctx| {
        ctx.channel.touch();
        ctx.response.status_code = STATUS_OK;
        ctx.response.message = "success".into();
        if show_logs {
            info!(
                channel_id = %ctx.channel.id(),
                name = ctx.channel.name().unwrap_or_default(),
                body = %ctx.request.body,
                "heartbeat"
            );
        }
    });
}

/// Channels in `registry` idle for longer than `idle_timeout` at `now`.
pub fn idle_channels(
    registry: &ConnectionRegistry,
    idle_timeout: Duration,
    now: Instant,
) -> Vec<Arc<Channel>> {
    registry
        .snapshot()
        .into_iter()
        .filter(|ch| ch.is_open() && ch.idle_for(now) > idle_timeout)
        .collect()
}

/// Client side: send a heartbeat on `channel` every `interval` until it
/// closes. The body is the current epoch time in milliseconds.
pub fn spawn_heartbeat_sender(
    engine: Engine,
    channel: Arc<Channel>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = time::interval(interval);
        let cancel = channel.cancel_token();
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let body = chrono::Utc::now().timestamp_millis().to_string();
                    let request = Request::new(HEARTBEAT_HANDLER, HEARTBEAT_METHOD).with_body(body);
                    let channel_id = channel.id().clone();
                    let _ = engine.send(&channel, request, move |resp| {
                        if !resp.is_success() {
                            warn!(
                                channel_id = %channel_id,
                                status = resp.status_code,
                                message = %resp.message,
                                "heartbeat failed"
                            );
                        }
                    });
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::detached_channel;
    use crate::handler::CallContext;

    #[tokio::test(start_paused = true)]
    async fn idle_channels_excludes_recent_activity() {
        let registry = ConnectionRegistry::new();
        let quiet = Arc::new(detached_channel(1).0);
        let chatty = Arc::new(detached_channel(1).0);
        quiet.activate();
        chatty.activate();
        let _ = registry.insert("quiet", quiet.clone());
        let _ = registry.insert("chatty", chatty.clone());

        time::advance(Duration::from_secs(50)).await;
        chatty.touch();
        time::advance(Duration::from_secs(20)).await;

        let idle = idle_channels(&registry, Duration::from_secs(60), Instant::now());
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id(), quiet.id());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_channels_are_not_reported() {
        let registry = ConnectionRegistry::new();
        let ch = Arc::new(detached_channel(1).0);
        ch.activate();
        let _ = ch.begin_closing(1000, "bye");
        let _ = registry.insert("a", ch);
        time::advance(Duration::from_secs(120)).await;
        assert!(idle_channels(&registry, Duration::from_secs(60), Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_handler_touches_and_succeeds() {
        let handlers = HandlerRegistry::new();
        install_heartbeat(&handlers, false);

        let channel = Arc::new(detached_channel(1).0);
        time::advance(Duration::from_secs(30)).await;
        assert_eq!(channel.idle_for(Instant::now()), Duration::from_secs(30));

        let mut ctx = CallContext::new(
            channel.clone(),
            Request::new(HEARTBEAT_HANDLER, HEARTBEAT_METHOD).with_body("1700000000000"),
        );
        let _ = handlers.dispatch(&mut ctx).await;
        assert_eq!(ctx.response.status_code, STATUS_OK);
        assert_eq!(ctx.response.message, "success");
        assert_eq!(channel.idle_for(Instant::now()), Duration::ZERO);
    }
}
