//! Per-connection state.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sockrpc_core::{ChannelId, Frame, Request, Response};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::{Engine, EngineInner};
use crate::error::EngineError;
use crate::handshake::HandshakeRequest;

/// Lifecycle of a channel. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Item on a channel's outbound queue.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    /// Sentinel: close the channel once everything queued before it is sent.
    Close { code: u16, reason: String },
}

/// One live connection.
pub struct Channel {
    id: ChannelId,
    name: OnceLock<String>,
    handshake: HandshakeRequest,
    connected_at: Instant,
    last_active: Mutex<Instant>,
    tx: mpsc::Sender<Outbound>,
    state: AtomicU8,
    close_reason: Mutex<Option<(u16, String)>>,
    cancel: CancellationToken,
    inflight: Arc<Semaphore>,
    dropped_frames: AtomicU64,
    engine: Weak<EngineInner>,
}

impl Channel {
    pub(crate) fn new(
        handshake: HandshakeRequest,
        tx: mpsc::Sender<Outbound>,
        engine: Weak<EngineInner>,
        max_inflight: usize,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ChannelId::new(),
            name: OnceLock::new(),
            handshake,
            connected_at: now,
            last_active: Mutex::new(now),
            tx,
            state: AtomicU8::new(ChannelState::Connecting as u8),
            close_reason: Mutex::new(None),
            cancel,
            inflight: Arc::new(Semaphore::new(max_inflight)),
            dropped_frames: AtomicU64::new(0),
            engine,
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Identity, once assigned. Anonymous channels return `None`.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// Assign the identity. Only the first non-empty assignment sticks.
    pub(crate) fn assign_name(&self, name: String) -> bool {
        !name.is_empty() && self.name.set(name).is_ok()
    }

    pub fn handshake(&self) -> &HandshakeRequest {
        &self.handshake
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), ChannelState::Connecting | ChannelState::Active)
    }

    pub(crate) fn activate(&self) {
        let _ = self.state.compare_exchange(
            ChannelState::Connecting as u8,
            ChannelState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Move to `Closing` and record why. Returns `false` if another caller
    /// got there first.
    pub(crate) fn begin_closing(&self, code: u16, reason: &str) -> bool {
        let moved = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < ChannelState::Closing as u8).then_some(ChannelState::Closing as u8)
            })
            .is_ok();
        if moved {
            *self.close_reason.lock() = Some((code, reason.to_owned()));
        }
        moved
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ChannelState::Closed as u8, Ordering::Release);
    }

    /// Code and reason the channel was closed with.
    pub fn close_reason(&self) -> Option<(u16, String)> {
        self.close_reason.lock().clone()
    }

    /// Record activity (heartbeat received).
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn last_active(&self) -> Instant {
        *self.last_active.lock()
    }

    /// Time since the last recorded activity, measured against `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active())
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames refused because the outbound queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn inflight(&self) -> Arc<Semaphore> {
        self.inflight.clone()
    }

    /// Resolves once the channel starts tearing down.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Owning engine, if it is still alive.
    pub fn engine(&self) -> Option<Engine> {
        self.engine.upgrade().map(|inner| Engine { inner })
    }

    /// Queue a frame for the writer task without waiting.
    pub(crate) fn enqueue(&self, frame: Frame) -> Result<(), EngineError> {
        if !self.is_open() {
            return Err(EngineError::ChannelClosed);
        }
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(Outbound::Frame(frame))) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel_id = %self.id,
                    frame_kind = frame.kind(),
                    frame_len = frame.len(),
                    "outbound queue full, dropping frame"
                );
                Err(EngineError::QueueFull)
            }
            Err(_) => Err(EngineError::ChannelClosed),
        }
    }

    /// Send a request on this channel; `callback` receives the response,
    /// a timeout, or a send failure, exactly once.
    pub fn send_message(
        &self,
        request: Request,
        callback: impl FnOnce(Response) + Send + 'static,
    ) {
        match self.engine() {
            Some(engine) => {
                let _ = engine.send(self, request, callback);
            }
            None => callback(Response::send_failed(request.id)),
        }
    }

    /// Ask the writer to close the channel after flushing what is queued.
    pub fn close(&self, code: u16, reason: &str) {
        if !self.is_open() {
            return;
        }
        let sentinel = Outbound::Close {
            code,
            reason: reason.to_owned(),
        };
        if self.tx.try_send(sentinel).is_err() {
            // queue full or writer gone; close without flushing
            self.terminate(code, reason);
        }
    }

    fn terminate(&self, code: u16, reason: &str) {
        match self.engine() {
            Some(engine) => engine.close_channel(self, code, reason),
            None => {
                if self.begin_closing(code, reason) {
                    self.cancel.cancel();
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn detached_channel(queue: usize) -> (Channel, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue);
        let channel = Channel::new(
            HandshakeRequest::new("/test"),
            tx,
            Weak::new(),
            4,
            CancellationToken::new(),
        );
        (channel, rx)
    }

    #[test]
    fn starts_connecting_then_activates() {
        let (ch, _rx) = detached_channel(4);
        assert_eq!(ch.state(), ChannelState::Connecting);
        ch.activate();
        assert_eq!(ch.state(), ChannelState::Active);
        assert!(ch.is_open());
        assert!(ch.id().as_str().starts_with("chan_"));
    }

    #[test]
    fn name_assigned_at_most_once() {
        let (ch, _rx) = detached_channel(4);
        assert!(ch.name().is_none());
        assert!(!ch.assign_name(String::new()));
        assert!(ch.name().is_none());
        assert!(ch.assign_name("alice".into()));
        assert!(!ch.assign_name("bob".into()));
        assert_eq!(ch.name(), Some("alice"));
    }

    #[test]
    fn first_close_reason_wins() {
        let (ch, _rx) = detached_channel(4);
        ch.activate();
        assert!(ch.begin_closing(1000, "timeout"));
        assert!(!ch.begin_closing(1011, "send_failed"));
        assert_eq!(ch.state(), ChannelState::Closing);
        assert_eq!(ch.close_reason(), Some((1000, "timeout".to_owned())));
        ch.mark_closed();
        assert_eq!(ch.state(), ChannelState::Closed);
        assert!(!ch.begin_closing(1000, "again"));
    }

    #[tokio::test]
    async fn enqueue_delivers_in_order() {
        let (ch, mut rx) = detached_channel(4);
        ch.activate();
        ch.enqueue(Frame::Text("a".into())).unwrap();
        ch.enqueue(Frame::Text("b".into())).unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, Outbound::Frame(Frame::Text(ref t)) if t == "a"));
        assert!(matches!(second, Outbound::Frame(Frame::Text(ref t)) if t == "b"));
    }

    #[test]
    fn enqueue_on_full_queue_counts_drop() {
        let (ch, _rx) = detached_channel(1);
        ch.activate();
        ch.enqueue(Frame::Text("a".into())).unwrap();
        let err = ch.enqueue(Frame::Text("b".into())).unwrap_err();
        assert!(matches!(err, EngineError::QueueFull));
        assert_eq!(ch.dropped_frames(), 1);
    }

    #[test]
    fn enqueue_after_close_fails() {
        let (ch, _rx) = detached_channel(4);
        ch.activate();
        let _ = ch.begin_closing(1000, "bye");
        assert!(matches!(
            ch.enqueue(Frame::Text("x".into())),
            Err(EngineError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn close_enqueues_sentinel() {
        let (ch, mut rx) = detached_channel(4);
        ch.activate();
        ch.enqueue(Frame::Text("last".into())).unwrap();
        ch.close(1000, "close_action");
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Frame(_)));
        match rx.recv().await.unwrap() {
            Outbound::Close { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "close_action");
            }
            other => panic!("expected close sentinel, got {other:?}"),
        }
        // still open until the writer acts on it
        assert!(ch.is_open());
    }

    #[test]
    fn close_without_room_terminates_directly() {
        let (ch, _rx) = detached_channel(1);
        ch.activate();
        ch.enqueue(Frame::Text("fill".into())).unwrap();
        ch.close(1000, "close_action");
        assert_eq!(ch.state(), ChannelState::Closing);
        assert!(ch.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_touch() {
        let (ch, _rx) = detached_channel(1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(ch.idle_for(Instant::now()), Duration::from_secs(30));
        ch.touch();
        assert_eq!(ch.idle_for(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn send_without_engine_fails_fast() {
        let (ch, _rx) = detached_channel(1);
        ch.activate();
        let (tx, rx) = std::sync::mpsc::channel();
        ch.send_message(Request::new("Chat", "Room"), move |resp| {
            tx.send(resp).unwrap();
        });
        let resp = rx.recv().unwrap();
        assert_eq!(resp.status_code, sockrpc_core::envelope::STATUS_SEND_FAILED);
    }
}
