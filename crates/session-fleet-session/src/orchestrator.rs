//! Multi-session scenarios over a bounded dispatcher.

use std::{collections::HashMap, time::Instant};

use session_fleet_core::{Session, SessionError, SessionId, StateBag};
use session_fleet_dispatch::{Dispatcher, RetryPolicy};

use crate::{
    SessionClient,
    report::{BatchReport, ConversationsReport, LoadTestReport},
};

/// Shape of a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTestPlan {
    pub sessions: usize,
    pub messages_per_session: usize,
}

impl Default for LoadTestPlan {
    fn default() -> Self {
        Self {
            sessions: 20,
            messages_per_session: 3,
        }
    }
}

/// Runs batches of session operations concurrently.
///
/// Different sessions proceed in parallel up to the dispatcher ceiling;
/// messages addressed to the same session are never reordered or
/// overlapped. Every call owns its results; nothing is kept between calls.
pub struct SessionOrchestrator {
    client: SessionClient,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
}

impl SessionOrchestrator {
    /// Create an orchestrator whose ceiling is the client's `max_concurrency`.
    #[must_use]
    pub fn new(client: SessionClient) -> Self {
        let dispatcher = Dispatcher::new(client.config().max_concurrency());
        Self {
            client,
            dispatcher,
            retry: RetryPolicy::none(),
        }
    }

    /// Use a different dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Retry idempotent operations (get, list, delete) with this policy.
    ///
    /// Creation and messaging are never retried.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &SessionClient {
        &self.client
    }

    /// Concurrency ceiling in use.
    #[must_use]
    pub const fn ceiling(&self) -> usize {
        self.dispatcher.ceiling()
    }

    /// Create one session per state bag.
    pub async fn create_many(&self, specs: Vec<StateBag>) -> BatchReport<SessionId> {
        let started = Instant::now();
        let ops: Vec<_> = specs
            .into_iter()
            .map(|state| {
                let client = self.client.clone();
                move || async move { client.create_session(state).await }
            })
            .collect();

        let report = BatchReport {
            results: self.dispatcher.run(ops).await,
            elapsed: started.elapsed(),
        };
        log_batch("create_many", &report);
        report
    }

    /// Send the same message to every session, one operation per session.
    pub async fn broadcast(&self, ids: &[SessionId], message: &str) -> BatchReport<String> {
        let started = Instant::now();
        let ops: Vec<_> = ids
            .iter()
            .map(|id| {
                let client = self.client.clone();
                let id = id.clone();
                let message = message.to_string();
                move || async move { client.send_message(&id, &message).await }
            })
            .collect();

        let report = BatchReport {
            results: self.dispatcher.run(ops).await,
            elapsed: started.elapsed(),
        };
        log_batch("broadcast", &report);
        report
    }

    /// Send messages to one session strictly in order.
    pub async fn run_conversation(
        &self,
        id: &SessionId,
        messages: Vec<String>,
    ) -> BatchReport<String> {
        let started = Instant::now();
        let ops: Vec<_> = messages
            .into_iter()
            .map(|message| {
                let client = self.client.clone();
                let target = id.clone();
                let op = move || async move { client.send_message(&target, &message).await };
                (id.clone(), op)
            })
            .collect();

        let report = BatchReport {
            results: self.dispatcher.run_grouped(ops).await,
            elapsed: started.elapsed(),
        };
        log_batch("run_conversation", &report);
        report
    }

    /// Run several conversations at once.
    ///
    /// Sessions run in parallel; within a session messages are sent one at
    /// a time in the given order. Every input session appears in the
    /// result, even with no messages.
    pub async fn run_conversations(
        &self,
        conversations: HashMap<SessionId, Vec<String>>,
    ) -> ConversationsReport {
        let started = Instant::now();
        let mut results: HashMap<SessionId, Vec<Result<String, SessionError>>> = conversations
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        let mut owners = Vec::new();
        let mut ops = Vec::new();
        for (id, messages) in conversations {
            for message in messages {
                let client = self.client.clone();
                let target = id.clone();
                owners.push(id.clone());
                ops.push((
                    id.clone(),
                    move || async move { client.send_message(&target, &message).await },
                ));
            }
        }

        let outcomes = self.dispatcher.run_grouped(ops).await;
        for (id, outcome) in owners.into_iter().zip(outcomes) {
            results.entry(id).or_default().push(outcome);
        }

        let report = ConversationsReport {
            results,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            sessions = report.results.len(),
            messages = report.total(),
            failed = report.failed(),
            elapsed = ?report.elapsed,
            "run_conversations finished"
        );
        report
    }

    /// Fetch several sessions.
    pub async fn fetch_many(&self, ids: &[SessionId]) -> BatchReport<Session> {
        let started = Instant::now();
        let ops: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(slot, id)| {
                let client = self.client.clone();
                let retry = self.retry_for_slot(slot);
                let id = id.clone();
                move || async move { retry.run(|| client.get_session(&id)).await }
            })
            .collect();

        let report = BatchReport {
            results: self.dispatcher.run(ops).await,
            elapsed: started.elapsed(),
        };
        log_batch("fetch_many", &report);
        report
    }

    /// Delete several sessions.
    pub async fn delete_many(&self, ids: &[SessionId]) -> BatchReport<bool> {
        let started = Instant::now();
        let ops: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(slot, id)| {
                let client = self.client.clone();
                let retry = self.retry_for_slot(slot);
                let id = id.clone();
                move || async move { retry.run(|| client.delete_session(&id)).await }
            })
            .collect();

        let report = BatchReport {
            results: self.dispatcher.run(ops).await,
            elapsed: started.elapsed(),
        };
        log_batch("delete_many", &report);
        report
    }

    /// List sessions, retrying network failures per the configured policy.
    ///
    /// # Errors
    /// Returns the client error once retries are exhausted.
    pub async fn list_sessions(
        &self,
        agent_id: Option<&str>,
    ) -> Result<Vec<Session>, SessionError> {
        self.retry.run(|| self.client.list_sessions(agent_id)).await
    }

    /// Create `plan.sessions` sessions, then run `plan.messages_per_session`
    /// ordered messages against each one that was created.
    pub async fn load_test(&self, plan: LoadTestPlan) -> LoadTestReport {
        tracing::info!(
            sessions = plan.sessions,
            messages_per_session = plan.messages_per_session,
            ceiling = self.ceiling(),
            "load test starting"
        );

        let specs = (0..plan.sessions)
            .map(|i| {
                StateBag::new(format!("LoadTest{i}"))
                    .with_preferences(format!("Load test user {i}"))
            })
            .collect();
        let creation = self.create_many(specs).await;

        let conversations = creation
            .successes()
            .map(|id| {
                let messages = (1..=plan.messages_per_session)
                    .map(|k| format!("Test message {k}"))
                    .collect();
                (id.clone(), messages)
            })
            .collect();
        let messaging = self.run_conversations(conversations).await;

        let report = LoadTestReport {
            creation,
            messaging,
        };
        tracing::info!(
            operations = report.total_operations(),
            failed = report.failed_operations(),
            elapsed = ?report.elapsed(),
            throughput = report.throughput(),
            "load test finished"
        );
        report
    }

    /// Retry policy for one slot of a batch, with its own jitter seed.
    fn retry_for_slot(&self, slot: usize) -> RetryPolicy {
        let offset = u64::try_from(slot).unwrap_or(u64::MAX);
        let seed = self.retry.jitter_seed().wrapping_add(offset);
        self.retry.clone().with_jitter_seed(seed)
    }
}

fn log_batch<T>(scenario: &str, report: &BatchReport<T>) {
    tracing::info!(
        scenario,
        ops = report.len(),
        failed = report.failed(),
        elapsed = ?report.elapsed,
        "batch finished"
    );
    for (index, err) in report.failures() {
        tracing::debug!(scenario, index, category = err.category(), "slot failed: {err}");
    }
}
