//! In-memory fake of the remote session service.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};
use session_fleet_core::{
    Method, Session, SessionId, StateBag, Transport, TransportError, TransportRequest,
    TransportResponse,
};
use uuid::Uuid;

use crate::protocol::{ChatRequest, CreateSessionRequest};

/// Produces the reply for a chat message.
pub type Responder = Arc<dyn Fn(&Session, &str) -> String + Send + Sync>;

/// Chooses the artificial latency of a request.
pub type LatencyFn = Arc<dyn Fn(&TransportRequest) -> Duration + Send + Sync>;

/// One exchanged chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub message: String,
    pub response: String,
}

/// A call observed by the fake, stamped with a global event counter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Event number when the call entered the transport.
    pub started: u64,
    /// Event number when the call left the transport.
    pub finished: u64,
}

impl RecordedCall {
    /// Session id carried in the body or path, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        if let Some(id) = self
            .body
            .as_ref()
            .and_then(|b| b.get("session_id"))
            .and_then(Value::as_str)
        {
            return Some(id.to_string());
        }
        self.path
            .strip_prefix("/sessions/")
            .map(|raw| percent_decode_str(raw).decode_utf8_lossy().into_owned())
    }
}

struct StoredSession {
    agent_id: String,
    state: StateBag,
    history: Vec<ChatTurn>,
    created: u64,
}

impl StoredSession {
    fn to_session(&self, id: &str) -> Session {
        Session {
            session_id: SessionId::new(id),
            agent_id: Some(self.agent_id.clone()),
            state: self.state.clone(),
        }
    }
}

/// In-memory transport emulating the remote agent runtime.
///
/// Useful for tests and offline demos. Records every call, tracks how many
/// calls were in flight at once, and can inject latency or refuse
/// connections. Data is lost on drop.
pub struct MemoryTransport {
    sessions: RwLock<HashMap<String, StoredSession>>,
    calls: Mutex<Vec<RecordedCall>>,
    responder: Responder,
    latency: Option<LatencyFn>,
    unreachable: AtomicBool,
    events: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryTransport {
    /// Create an empty fake with the default echo responder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            responder: Arc::new(default_reply),
            latency: None,
            unreachable: AtomicBool::new(false),
            events: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Replace the chat responder.
    #[must_use]
    pub fn with_responder(
        mut self,
        responder: impl Fn(&Session, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    /// Delay every request by the duration the function returns.
    #[must_use]
    pub fn with_latency(
        mut self,
        latency: impl Fn(&TransportRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Some(Arc::new(latency));
        self
    }

    /// Delay every request by a fixed duration.
    #[must_use]
    pub fn with_fixed_latency(self, latency: Duration) -> Self {
        self.with_latency(move |_| latency)
    }

    /// Refuse (or accept again) every connection.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Drop a session as if it had expired remotely.
    pub fn expire(&self, id: &SessionId) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id.as_str())
            .is_some()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Chat history of a session.
    #[must_use]
    pub fn history(&self, id: &SessionId) -> Option<Vec<ChatTurn>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.as_str())
            .map(|s| s.history.clone())
    }

    /// Every finished call, ordered by start.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        calls.sort_by_key(|c| c.started);
        calls
    }

    /// Number of finished calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Forget recorded calls and the in-flight peak. Sessions are kept.
    pub fn reset_stats(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.peak_in_flight
            .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    fn next_event(&self) -> u64 {
        self.events.fetch_add(1, Ordering::SeqCst)
    }

    async fn handle(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(request)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable {
                message: "connection refused".to_string(),
            });
        }

        let path = request.path.as_str();
        match (request.method, path) {
            (Method::Post, "/sessions") => self.create(request.body.as_ref()),
            (Method::Get, "/sessions") => self.list(),
            (Method::Post, "/chat") => self.chat(request.body.as_ref()),
            (Method::Get, _) if path.starts_with("/sessions/") => self.get(session_segment(path)),
            (Method::Delete, _) if path.starts_with("/sessions/") => {
                self.delete(session_segment(path))
            }
            _ => Err(status(404, "Not Found")),
        }
    }

    fn create(&self, body: Option<&Value>) -> Result<TransportResponse, TransportError> {
        let request: CreateSessionRequest = parse_body(body)?;
        let id = Uuid::new_v4().to_string();
        let created = self.next_event();

        self.sessions.write().map_err(internal)?.insert(
            id.clone(),
            StoredSession {
                agent_id: request.agent_id,
                state: request.state,
                history: Vec::new(),
                created,
            },
        );

        Ok(ok(json!({ "session_id": id })))
    }

    fn list(&self) -> Result<TransportResponse, TransportError> {
        let sessions = self.sessions.read().map_err(internal)?;
        let mut stored: Vec<(&String, &StoredSession)> = sessions.iter().collect();
        stored.sort_by_key(|(_, s)| s.created);

        let sessions: Vec<Session> = stored
            .into_iter()
            .map(|(id, s)| s.to_session(id))
            .collect();
        Ok(ok(json!({ "sessions": sessions })))
    }

    fn get(&self, id: String) -> Result<TransportResponse, TransportError> {
        let sessions = self.sessions.read().map_err(internal)?;
        let session = sessions
            .get(&id)
            .ok_or_else(|| status(404, "Session not found"))?;
        Ok(ok(json!({ "session_id": id, "state": session.state })))
    }

    fn delete(&self, id: String) -> Result<TransportResponse, TransportError> {
        self.sessions
            .write()
            .map_err(internal)?
            .remove(&id)
            .ok_or_else(|| status(404, "Session not found"))?;
        Ok(ok(json!({ "status": "deleted" })))
    }

    fn chat(&self, body: Option<&Value>) -> Result<TransportResponse, TransportError> {
        let request: ChatRequest = parse_body(body)?;
        let mut sessions = self.sessions.write().map_err(internal)?;
        let stored = sessions
            .get_mut(request.session_id.as_str())
            .ok_or_else(|| status(404, "Session not found"))?;

        let reply = (self.responder)(
            &stored.to_session(request.session_id.as_str()),
            &request.message,
        );
        stored.history.push(ChatTurn {
            message: request.message,
            response: reply.clone(),
        });

        Ok(ok(json!({ "response": reply })))
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let started = self.next_event();
        let guard = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);

        let result = tokio::time::timeout(request.timeout, self.handle(&request))
            .await
            .unwrap_or(Err(TransportError::Timeout {
                after: request.timeout,
            }));

        drop(guard);
        let finished = self.next_event();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                method: request.method,
                path: request.path,
                body: request.body,
                started,
                finished,
            });

        result
    }
}

/// Counts a call as in flight until dropped, including on cancellation.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn default_reply(session: &Session, message: &str) -> String {
    let name = session.state.user_name().unwrap_or("there");
    format!("Hello {name}! You said: {message}")
}

fn session_segment(path: &str) -> String {
    let raw = path.trim_start_matches("/sessions/");
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Option<&Value>) -> Result<T, TransportError> {
    let body = body.ok_or_else(|| status(422, "missing request body"))?;
    serde_json::from_value(body.clone()).map_err(|e| status(422, &e.to_string()))
}

fn ok(body: Value) -> TransportResponse {
    TransportResponse { status: 200, body }
}

fn status(code: u16, detail: &str) -> TransportError {
    TransportError::Http {
        status: code,
        body: json!({ "detail": detail }).to_string(),
    }
}

fn internal<E: std::fmt::Display>(err: E) -> TransportError {
    status(500, &err.to_string())
}
