//! Server-side adapter over axum's upgraded `WebSocket`.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use sockrpc_core::frame::CLOSE_NORMAL;
use sockrpc_core::Frame;

use super::{FrameReceiver, FrameSender, Transport};
use crate::error::TransportError;

pub struct AxumTransport {
    socket: WebSocket,
}

impl AxumTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for AxumTransport {
    type Sender = AxumSender;
    type Receiver = AxumReceiver;

    fn split(self) -> (AxumSender, AxumReceiver) {
        let (ws_tx, ws_rx) = self.socket.split();
        (AxumSender { inner: ws_tx }, AxumReceiver { inner: ws_rx })
    }
}

pub struct AxumSender {
    inner: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl FrameSender for AxumSender {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
            Frame::Close { code, reason } => WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        };
        self.inner
            .send(msg)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.send(Frame::Close {
            code,
            reason: reason.to_owned(),
        })
        .await?;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

pub struct AxumReceiver {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReceiver for AxumReceiver {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let msg = match self.inner.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };
            let frame = match msg {
                WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
                WsMessage::Binary(bytes) => Frame::Binary(bytes.to_vec()),
                WsMessage::Close(close) => {
                    let (code, reason) = close
                        .map(|c| (c.code, c.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    Frame::Close { code, reason }
                }
                // axum answers pings itself
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}
