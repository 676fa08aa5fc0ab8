//! Bidirectional request/response engine over persistent full-duplex
//! connections.
//!
//! An [`Engine`] owns every piece of shared state: the connection registry,
//! pending calls, handlers and filter pipelines. Transports are attached to
//! it one connection at a time; either side may then issue `handler.method`
//! requests and get correlated responses back.

pub mod channel;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod filter;
pub mod handler;
pub mod handshake;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use channel::{Channel, ChannelState};
pub use config::{EngineConfig, ServerConfig};
pub use engine::{Connected, Engine};
pub use error::{EngineError, TransportError};
pub use filter::FilterAction;
pub use handler::{CallContext, DispatchOutcome, MethodHandler, ObjectHandler};
pub use handshake::HandshakeRequest;
pub use server::{listen, router, ServerHandle};
