//! Client-side adapter over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use sockrpc_core::frame::CLOSE_NORMAL;
use sockrpc_core::Frame;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{FrameReceiver, FrameSender, Transport};
use crate::error::TransportError;

pub struct TungsteniteTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> TungsteniteTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

/// Open a client connection to `url` (`ws://` or `wss://`).
pub async fn connect(
    url: &str,
) -> Result<TungsteniteTransport<MaybeTlsStream<TcpStream>>, TransportError> {
    let (stream, response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    tracing::debug!(url, status = %response.status(), "websocket connected");
    Ok(TungsteniteTransport::new(stream))
}

impl<S> Transport for TungsteniteTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Sender = TungsteniteSender<S>;
    type Receiver = TungsteniteReceiver<S>;

    fn split(self) -> (Self::Sender, Self::Receiver) {
        let (tx, rx) = self.stream.split();
        (TungsteniteSender { inner: tx }, TungsteniteReceiver { inner: rx })
    }
}

pub struct TungsteniteSender<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> FrameSender for TungsteniteSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
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

pub struct TungsteniteReceiver<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameReceiver for TungsteniteReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let msg = match self.inner.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };
            let frame = match msg {
                Message::Text(text) => Frame::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
                Message::Close(close) => {
                    let (code, reason) = close
                        .map(|c| (u16::from(c.code), c.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                    Frame::Close { code, reason }
                }
                // tungstenite queues pongs for us
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}
