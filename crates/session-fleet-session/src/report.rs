//! Batch outcomes and derived measurements.
//!
//! Elapsed time and throughput are reported for observability only; they
//! never feed back into scheduling.

use std::{collections::HashMap, time::Duration};

use session_fleet_core::{SessionError, SessionId};

/// Per-slot outcome of one dispatched batch, aligned with the input.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T> {
    pub results: Vec<Result<T, SessionError>>,
    pub elapsed: Duration,
}

impl<T> BatchReport<T> {
    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of successful slots.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Number of failed slots.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Failed slots with their input index.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &SessionError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    /// Successful values, skipping failures.
    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    /// Completed operations per second, successes and failures alike.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        throughput(self.len(), self.elapsed)
    }
}

impl<T: Clone> BatchReport<T> {
    /// Clone out the successful values.
    #[must_use]
    pub fn ok_values(&self) -> Vec<T> {
        self.successes().cloned().collect()
    }
}

/// Outcome of several ordered conversations run together.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationsReport {
    /// Replies per session, in the order the messages were given.
    pub results: HashMap<SessionId, Vec<Result<String, SessionError>>>,
    pub elapsed: Duration,
}

impl ConversationsReport {
    /// Total number of messages sent.
    #[must_use]
    pub fn total(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    /// Number of failed messages across all sessions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results
            .values()
            .flatten()
            .filter(|r| r.is_err())
            .count()
    }

    /// Replies for one session.
    #[must_use]
    pub fn for_session(&self, id: &SessionId) -> Option<&[Result<String, SessionError>]> {
        self.results.get(id).map(Vec::as_slice)
    }

    /// Messages per second.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        throughput(self.total(), self.elapsed)
    }
}

/// Two-phase load test summary.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTestReport {
    pub creation: BatchReport<SessionId>,
    pub messaging: ConversationsReport,
}

impl LoadTestReport {
    /// Operations attempted in both phases.
    #[must_use]
    pub fn total_operations(&self) -> usize {
        self.creation.len() + self.messaging.total()
    }

    /// Operations that failed in both phases.
    #[must_use]
    pub fn failed_operations(&self) -> usize {
        self.creation.failed() + self.messaging.failed()
    }

    /// Wall time of both phases.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.creation.elapsed + self.messaging.elapsed
    }

    /// Operations per second over both phases.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        throughput(self.total_operations(), self.elapsed())
    }
}

#[allow(clippy::cast_precision_loss)]
fn throughput(ops: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { ops as f64 / secs } else { 0.0 }
}
