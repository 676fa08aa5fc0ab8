//! In-process transport pair, used by tests and embedded peers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sockrpc_core::Frame;
use tokio::sync::mpsc;

use super::{FrameReceiver, FrameSender, Transport};
use crate::error::TransportError;

/// One end of an in-memory duplex link.
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
    broken: Arc<AtomicBool>,
}

/// Two connected ends: frames sent on one arrive on the other.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: a_tx,
            rx: a_rx,
            broken: Arc::default(),
        },
        MemoryTransport {
            tx: b_tx,
            rx: b_rx,
            broken: Arc::default(),
        },
    )
}

impl MemoryTransport {
    /// Handle that makes every later write on this end fail.
    pub fn write_fault(&self) -> WriteFault {
        WriteFault(self.broken.clone())
    }
}

/// Fault injection switch for a [`MemoryTransport`] write half.
#[derive(Clone)]
pub struct WriteFault(Arc<AtomicBool>);

impl WriteFault {
    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn split(self) -> (MemorySender, MemoryReceiver) {
        (
            MemorySender {
                tx: Some(self.tx),
                broken: self.broken,
            },
            MemoryReceiver { rx: self.rx },
        )
    }
}

pub struct MemorySender {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSender for MemorySender {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::Send("write fault".into()));
        }
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        // Dropping the sender ends the peer's stream after the close frame.
        match self.tx.take() {
            Some(tx) => tx
                .send(Frame::Close {
                    code,
                    reason: reason.to_owned(),
                })
                .map_err(|_| TransportError::Closed),
            None => Ok(()),
        }
    }
}

pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (a, b) = pair();
        let (mut a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        a_tx.send(Frame::Text("hi".into())).await.unwrap();
        a_tx.send(Frame::Binary(vec![1, 2])).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap().unwrap(), Frame::Text("hi".into()));
        assert_eq!(b_rx.recv().await.unwrap().unwrap(), Frame::Binary(vec![1, 2]));
    }

    #[tokio::test]
    async fn close_delivers_frame_then_ends_stream() {
        let (a, b) = pair();
        let (mut a_tx, _a_rx) = a.split();
        let (_b_tx, mut b_rx) = b.split();

        a_tx.close(1000, "bye").await.unwrap();
        assert_eq!(
            b_rx.recv().await.unwrap().unwrap(),
            Frame::Close {
                code: 1000,
                reason: "bye".into()
            }
        );
        assert!(b_rx.recv().await.is_none());
        assert!(matches!(
            a_tx.send(Frame::Text("late".into())).await,
            Err(TransportError::Closed)
        ));
        // second close is a no-op
        a_tx.close(1000, "again").await.unwrap();
    }

    #[tokio::test]
    async fn tripped_fault_fails_writes() {
        let (a, _b) = pair();
        let fault = a.write_fault();
        let (mut a_tx, _a_rx) = a.split();
        fault.trip();
        assert!(matches!(
            a_tx.send(Frame::Text("x".into())).await,
            Err(TransportError::Send(_))
        ));
    }
}
