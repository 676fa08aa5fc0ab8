/// A transport frame.
///
/// Requests travel as `Text`, responses as `Binary`; the frame type alone
/// tells the receiver which path an inbound message takes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Unexpected condition, e.g. a failed write.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Close { .. } => "close",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
            Self::Close { reason, .. } => reason.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
