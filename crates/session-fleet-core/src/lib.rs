//! Core abstractions for driving remote agent sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionId`, `Session` - Opaque ids and session records
//! - `StateBag` - Per-user state attached to a session at creation
//! - `ClientConfig` - Immutable client configuration
//! - `Transport` - Single request/response exchange with the remote service
//! - Error taxonomy shared by every layer

pub mod config;
pub mod error;
pub mod state;
pub mod traits;

pub use config::ClientConfig;
pub use error::{DispatchError, SessionError, TransportError};
pub use state::StateBag;
pub use traits::{Method, Session, SessionId, Transport, TransportRequest, TransportResponse};
