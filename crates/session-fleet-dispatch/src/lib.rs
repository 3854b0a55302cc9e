//! Bounded-concurrency dispatch for batches of session operations.
//!
//! Provides:
//! - `Dispatcher` - Sliding-window executor with order-preserving fan-in
//! - `RetryPolicy` - Explicit, opt-in retry for idempotent operations

pub mod dispatcher;
pub mod retry;

pub use dispatcher::Dispatcher;
pub use retry::{Backoff, RetryPolicy};
