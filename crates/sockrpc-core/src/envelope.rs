//! Request/Response envelopes exchanged between peers.
//!
//! Wire format (JSON):
//! - Request: `{ id, handler, method, headers, body, transfer_scheme }`
//! - Response: `{ id, headers, status_code, message, body, transfer_scheme }`
//!
//! Legacy field names (`uid`, `header`, `code`, `msg`, `sign`) are accepted on
//! input so older peers keep working.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Handler answered normally.
pub const STATUS_OK: i32 = 0;
/// No response arrived before the pending call's deadline.
pub const STATUS_TIMEOUT: i32 = -1;
/// The inbound request frame could not be decoded.
pub const STATUS_MALFORMED: i32 = -2;
/// The request never left this process (channel closed or queue full).
pub const STATUS_SEND_FAILED: i32 = -3;
/// A later registration reused this call's id.
pub const STATUS_SUPERSEDED: i32 = -4;
/// A server-request filter stopped the send.
pub const STATUS_FILTERED: i32 = -5;

/// How the `body` field is encoded on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransferScheme {
    /// Body carried verbatim.
    #[default]
    None,
    /// Standard base64 (padded).
    Base64,
    /// URL-safe base64.
    Url,
    /// Anything else a peer sent us. Bodies in this scheme decode to empty.
    Unknown(String),
}

impl TransferScheme {
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Base64 => "base64",
            Self::Url => "url",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for TransferScheme {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" | "none" => Self::None,
            "base64" => Self::Base64,
            "url" => Self::Url,
            _ => Self::Unknown(s),
        }
    }
}

impl From<&str> for TransferScheme {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<TransferScheme> for String {
    fn from(scheme: TransferScheme) -> Self {
        scheme.as_str().to_owned()
    }
}

impl fmt::Display for TransferScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named `handler.method` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "MessageId::empty", alias = "uid")]
    pub id: MessageId,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, alias = "header")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "sign")]
    pub transfer_scheme: TransferScheme,
}

impl Request {
    /// Build a request with a freshly generated id.
    pub fn new(handler: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            handler: handler.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_scheme(mut self, scheme: TransferScheme) -> Self {
        self.transfer_scheme = scheme;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(key.into(), value.into());
        self
    }

    /// Copy of this request under a new id, for fan-out.
    pub fn reissue(&self) -> Self {
        Self {
            id: MessageId::new(),
            ..self.clone()
        }
    }

    /// Registry key for function handlers.
    pub fn handler_key(&self) -> String {
        handler_key(&self.handler, &self.method)
    }
}

/// Key under which a `(handler, method)` function is registered.
pub fn handler_key(handler: &str, method: &str) -> String {
    format!("{handler}@{method}")
}

/// Answer to a [`Request`], correlated by `id`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "MessageId::empty", alias = "uid")]
    pub id: MessageId,
    #[serde(default, alias = "header")]
    pub headers: HashMap<String, String>,
    #[serde(default, alias = "code")]
    pub status_code: i32,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, alias = "sign")]
    pub transfer_scheme: TransferScheme,
}

impl Response {
    /// Empty success response for `id`, the starting point handed to handlers.
    pub fn for_request(id: MessageId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Synthetic failure delivered to a pending callback.
    pub fn failure(id: MessageId, status_code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            status_code,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn timeout(id: MessageId) -> Self {
        Self::failure(id, STATUS_TIMEOUT, "timeout")
    }

    pub fn send_failed(id: MessageId) -> Self {
        Self::failure(id, STATUS_SEND_FAILED, "failed_to_send")
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }
}

/// Either kind of envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
}

impl Envelope {
    pub fn id(&self) -> &MessageId {
        match self {
            Self::Request(r) => &r.id,
            Self::Response(r) => &r.id,
        }
    }
}

impl From<Request> for Envelope {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Envelope {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}
