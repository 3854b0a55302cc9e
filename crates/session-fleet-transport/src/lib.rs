//! Transports for the remote session API.
//!
//! Provides:
//! - Wire protocol (request/response bodies)
//! - `HttpTransport` backed by reqwest
//! - `MemoryTransport`, an in-process fake of the remote service (feature: memory)

pub mod http;
pub mod protocol;

#[cfg(feature = "memory")]
pub mod memory;

pub use http::HttpTransport;
#[cfg(feature = "memory")]
pub use memory::{MemoryTransport, RecordedCall};
pub use protocol::{
    ChatRequest, ChatResponse, CreateSessionRequest, CreateSessionResponse, ListSessionsResponse,
};
