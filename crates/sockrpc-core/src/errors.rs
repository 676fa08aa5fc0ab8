use crate::envelope::TransferScheme;

/// Envelope (de)serialization failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Decode(String),
    #[error("cannot encode envelope: {0}")]
    Encode(String),
    #[error("{0} frame does not carry an envelope")]
    UnexpectedFrame(&'static str),
}

/// Body transfer-scheme failure. Never fatal: the body degrades to empty.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("unknown transfer scheme {0:?}")]
    UnknownScheme(String),
    #[error("invalid {scheme} body: {reason}")]
    InvalidBody {
        scheme: TransferScheme,
        reason: String,
    },
}

/// Every per-frame or per-channel fault the protocol distinguishes.
///
/// Faults are local to the frame or channel that produced them; only
/// `SendFailure` escalates, and only to closing that one channel.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProtocolFault {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error(transparent)]
    TransferScheme(#[from] TransferError),
    #[error("send failed: {0}")]
    SendFailure(String),
    #[error("no handler for {handler}@{method}")]
    DispatchMiss { handler: String, method: String },
    #[error("no pending call for response {0}")]
    OrphanResponse(String),
    #[error("call {0} timed out")]
    CallTimeout(String),
}

impl ProtocolFault {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::HandshakeRejected(_) => "handshake_rejected",
            Self::Decode(_) => "decode_error",
            Self::TransferScheme(_) => "transfer_scheme_error",
            Self::SendFailure(_) => "send_failure",
            Self::DispatchMiss { .. } => "dispatch_miss",
            Self::OrphanResponse(_) => "orphan_response",
            Self::CallTimeout(_) => "call_timeout",
        }
    }

    /// Whether the fault ends the channel it happened on.
    pub fn is_fatal_to_channel(&self) -> bool {
        matches!(self, Self::SendFailure(_))
    }
}
