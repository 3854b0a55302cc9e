//! Wire protocol for the remote session API.

use serde::{Deserialize, Serialize};
use session_fleet_core::{Session, SessionId, StateBag};

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: String,
    pub state: StateBag,
}

/// Reply to `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub message: String,
}

/// Reply to `POST /chat`.
///
/// The remote schema is not pinned down: some versions answer with
/// `response`, others with `text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ChatResponse {
    /// The reply text: `response` first, `text` if `response` is absent.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        self.response.or(self.text)
    }
}

/// Reply to `GET /sessions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    #[serde(default)]
    pub sessions: Vec<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_response_prefers_primary_field() {
        let parsed: ChatResponse =
            serde_json::from_value(json!({"response": "primary", "text": "secondary"})).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("primary"));
    }

    #[test]
    fn test_chat_response_falls_back_to_text() {
        let parsed: ChatResponse = serde_json::from_value(json!({"text": "secondary"})).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("secondary"));

        let parsed: ChatResponse =
            serde_json::from_value(json!({"response": null, "text": "secondary"})).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("secondary"));
    }

    #[test]
    fn test_chat_response_without_either_field() {
        let parsed: ChatResponse = serde_json::from_value(json!({"other": 1})).unwrap();
        assert_eq!(parsed.into_text(), None);
    }

    #[test]
    fn test_create_request_shape() {
        let req = CreateSessionRequest {
            agent_id: "agent".to_string(),
            state: StateBag::new("Alice"),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"agent_id": "agent", "state": {"user_name": "Alice"}})
        );
    }

    #[test]
    fn test_list_response_defaults_to_empty() {
        let parsed: ListSessionsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.sessions.is_empty());
    }
}
