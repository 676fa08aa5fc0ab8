//! Envelope types, ids, frames and codec shared by both peers.

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod transfer;

pub use envelope::{Envelope, Request, Response, TransferScheme};
pub use errors::{CodecError, ProtocolFault, TransferError};
pub use frame::Frame;
pub use ids::{ChannelId, MessageId};
