use sockrpc_core::CodecError;

/// Failure reported by a transport adapter.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("transport closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Errors surfaced by the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Verify hook refused the connection. `sentinel` is the body returned
    /// to the connecting peer.
    #[error("handshake rejected: {sentinel}")]
    HandshakeRejected { sentinel: &'static str },
    #[error("channel is closed")]
    ChannelClosed,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Body returned when the verify hook rejects a connection.
pub const VERIFY_ERROR: &str = "verify_error";
/// Body returned when the protocol upgrade fails.
pub const UPGRADE_ERROR: &str = "upgrade_error";
