//! Session client and multi-session orchestration.
//!
//! Provides:
//! - `SessionClient` - Typed session operations over a `Transport`
//! - `SessionOrchestrator` - Concurrent scenarios across many sessions
//! - Batch reports with per-slot outcomes and derived throughput

pub mod client;
pub mod orchestrator;
pub mod report;

pub use client::SessionClient;
pub use orchestrator::{LoadTestPlan, SessionOrchestrator};
pub use report::{BatchReport, ConversationsReport, LoadTestReport};
pub use session_fleet_core::{ClientConfig, Session, SessionError, SessionId, StateBag};
