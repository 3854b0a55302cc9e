//! Typed session operations.

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use session_fleet_core::{
    ClientConfig, Method, Session, SessionError, SessionId, StateBag, Transport, TransportError,
    TransportRequest, TransportResponse,
};
use session_fleet_transport::{
    ChatRequest, ChatResponse, CreateSessionRequest, CreateSessionResponse, HttpTransport,
    ListSessionsResponse,
};

/// Characters left unescaped in a path segment or query value.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Client for the remote session API.
///
/// Holds no mutable state: clones share the configuration and transport,
/// and every method may be called concurrently.
#[derive(Clone)]
pub struct SessionClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl SessionClient {
    /// Create a client talking HTTP to `config.base_url()`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let transport = HttpTransport::from_config(&config);
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport.
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self::from_shared(Arc::new(config), Arc::new(transport))
    }

    /// Create a client from already shared parts.
    #[must_use]
    pub fn from_shared(config: Arc<ClientConfig>, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// The client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a session bound to the configured agent.
    ///
    /// # Errors
    /// Returns `InvalidState` without touching the network if `user_name`
    /// is missing or blank; otherwise a network or rejection error.
    pub async fn create_session(&self, state: StateBag) -> Result<SessionId, SessionError> {
        let agent_id = self.config.agent_id().to_string();
        self.create_session_for(&agent_id, state).await
    }

    /// Create a session bound to a specific agent.
    ///
    /// # Errors
    /// Same as [`SessionClient::create_session`].
    pub async fn create_session_for(
        &self,
        agent_id: &str,
        state: StateBag,
    ) -> Result<SessionId, SessionError> {
        state.validate()?;
        let body = to_body(&CreateSessionRequest {
            agent_id: agent_id.to_string(),
            state,
        })?;

        let request = TransportRequest::new(Method::Post, "/sessions", self.config.create_timeout())
            .with_body(body);
        let response = self.transport.execute(request).await?;
        let created: CreateSessionResponse = decode(response.body)?;

        if created.session_id.as_str().is_empty() {
            return Err(SessionError::MalformedResponse(
                "empty session_id".to_string(),
            ));
        }
        tracing::debug!(session_id = %created.session_id, agent_id, "session created");
        Ok(created.session_id)
    }

    /// Send a message and wait for the reply text.
    ///
    /// # Errors
    /// Returns `SessionNotFound` on 404, `MalformedResponse` if the reply
    /// carries neither `response` nor `text`, else a network or rejection error.
    pub async fn send_message(&self, id: &SessionId, text: &str) -> Result<String, SessionError> {
        let body = to_body(&ChatRequest {
            session_id: id.clone(),
            message: text.to_string(),
        })?;

        let request = TransportRequest::new(Method::Post, "/chat", self.config.request_timeout())
            .with_body(body);
        let response = self.execute_for(id, request).await?;
        let reply: ChatResponse = decode(response.body)?;

        reply.into_text().ok_or_else(|| {
            SessionError::MalformedResponse("reply has neither `response` nor `text`".to_string())
        })
    }

    /// List sessions, optionally keeping only those of one agent.
    ///
    /// The remote API cannot filter, so filtering happens here.
    ///
    /// # Errors
    /// Returns a network, rejection or decoding error.
    pub async fn list_sessions(
        &self,
        agent_id: Option<&str>,
    ) -> Result<Vec<Session>, SessionError> {
        let request =
            TransportRequest::new(Method::Get, "/sessions", self.config.request_timeout());
        let response = self.transport.execute(request).await?;
        let listed: ListSessionsResponse = decode(response.body)?;

        Ok(match agent_id {
            Some(agent_id) => listed
                .sessions
                .into_iter()
                .filter(|s| s.agent_id.as_deref() == Some(agent_id))
                .collect(),
            None => listed.sessions,
        })
    }

    /// Fetch a session with its full state.
    ///
    /// # Errors
    /// Returns `SessionNotFound` on 404, else a network, rejection or decoding error.
    pub async fn get_session(&self, id: &SessionId) -> Result<Session, SessionError> {
        let request =
            TransportRequest::new(Method::Get, session_path(id), self.config.request_timeout());
        let response = self.execute_for(id, request).await?;
        decode(response.body)
    }

    /// Delete a session.
    ///
    /// # Errors
    /// Returns `SessionNotFound` on 404, else a network or rejection error.
    pub async fn delete_session(&self, id: &SessionId) -> Result<bool, SessionError> {
        let request =
            TransportRequest::new(Method::Delete, session_path(id), self.config.request_timeout());
        self.execute_for(id, request).await?;
        tracing::debug!(session_id = %id, "session deleted");
        Ok(true)
    }

    /// URL of the web chat view for a session. No network call.
    #[must_use]
    pub fn chat_url(&self, id: &SessionId) -> String {
        format!(
            "{}/?session={}",
            self.config.base_url(),
            utf8_percent_encode(id.as_str(), SEGMENT)
        )
    }

    async fn execute_for(
        &self,
        id: &SessionId,
        request: TransportRequest,
    ) -> Result<TransportResponse, SessionError> {
        self.transport
            .execute(request)
            .await
            .map_err(|err| match err {
                TransportError::Http { status: 404, .. } => {
                    SessionError::SessionNotFound(id.clone())
                }
                other => other.into(),
            })
    }
}

fn session_path(id: &SessionId) -> String {
    format!("/sessions/{}", utf8_percent_encode(id.as_str(), SEGMENT))
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, SessionError> {
    serde_json::to_value(value).map_err(|e| SessionError::InvalidState(e.to_string()))
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, SessionError> {
    serde_json::from_value(body).map_err(|e| SessionError::MalformedResponse(e.to_string()))
}
