//! Full-duplex framed transport abstraction.
//!
//! The engine never touches sockets directly: it drives a [`FrameReceiver`]
//! from the channel's reader task and a [`FrameSender`] from its writer task.
//! Adapters translate their own message types into [`Frame`]s and swallow
//! ping/pong control traffic.

pub mod axum_ws;
pub mod memory;
pub mod tungstenite;

use async_trait::async_trait;
use sockrpc_core::Frame;

use crate::error::TransportError;

/// Write half of a transport. Owned by exactly one writer task.
#[async_trait]
pub trait FrameSender: Send + 'static {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame with `code`/`reason` and shut the write half.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Read half of a transport. Owned by exactly one reader task.
#[async_trait]
pub trait FrameReceiver: Send + 'static {
    /// Next data or close frame; `None` once the peer is gone.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// A connected, handshaken transport that can be split into halves.
pub trait Transport: Send + 'static {
    type Sender: FrameSender;
    type Receiver: FrameReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver);
}
