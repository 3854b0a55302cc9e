//! Error taxonomy.
//!
//! Every failure is an ordinary value so a batch can record it per slot
//! without aborting sibling operations.

use std::time::Duration;

use thiserror::Error;

use crate::SessionId;

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established (DNS, refused, reset).
    #[error("Remote service unreachable: {message}")]
    Unreachable { message: String },
    /// The exchange exceeded its deadline.
    #[error("Request timed out after {after:?}")]
    Timeout { after: Duration },
    /// Non-2xx response, passed through uninterpreted.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// 2xx response whose body is not JSON.
    #[error("Malformed response body: {message}")]
    MalformedBody { message: String },
}

/// Scheduling failure of a dispatched unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The unit holding this slot panicked.
    #[error("Operation {index} panicked")]
    Panicked { index: usize },
    /// The unit holding this slot was cancelled before completing.
    #[error("Operation {index} was cancelled")]
    Cancelled { index: usize },
}

/// Session client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Remote service unreachable: {0}")]
    Unreachable(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Request rejected ({status}): {body}")]
    RequestRejected { status: u16, body: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// Rejected locally, before any network call.
    #[error("Invalid session state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl SessionError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Only network-level failures qualify; callers must still decide
    /// whether the operation is safe to repeat.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }

    /// Short category string for logs.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Timeout(_) => "timeout",
            Self::SessionNotFound(_) => "not_found",
            Self::RequestRejected { .. } => "rejected",
            Self::MalformedResponse(_) => "malformed",
            Self::InvalidState(_) => "invalid_state",
            Self::Dispatch(_) => "dispatch",
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable { message } => Self::Unreachable(message),
            TransportError::Timeout { after } => Self::Timeout(after),
            TransportError::Http { status, body } => Self::RequestRejected { status, body },
            TransportError::MalformedBody { message } => Self::MalformedResponse(message),
        }
    }
}
