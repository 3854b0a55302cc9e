//! Per-user state attached to a session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SessionError;

/// Key that every state bag must carry at creation.
pub const USER_NAME: &str = "user_name";
/// Optional contact address.
pub const USER_EMAIL: &str = "user_email";
/// Optional free-form preferences.
pub const USER_PREFERENCES: &str = "user_preferences";
/// Optional conversation context.
pub const CONVERSATION_CONTEXT: &str = "conversation_context";

/// State bag sent with a create request.
///
/// Keys are caller-defined apart from `user_name`. Values are JSON so
/// callers may store scalars other than strings. After creation the
/// remote service owns the state; the client only sees it again through
/// `get_session` or `list_sessions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBag {
    entries: HashMap<String, Value>,
}

impl StateBag {
    /// Create a state bag for the given user.
    #[must_use]
    pub fn new(user_name: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(USER_NAME.to_string(), Value::String(user_name.into()));
        Self { entries }
    }

    /// Attach an email. Empty strings are skipped.
    #[must_use]
    pub fn with_email(self, email: impl Into<String>) -> Self {
        self.with_non_empty(USER_EMAIL, email.into())
    }

    /// Attach preferences. Empty strings are skipped.
    #[must_use]
    pub fn with_preferences(self, preferences: impl Into<String>) -> Self {
        self.with_non_empty(USER_PREFERENCES, preferences.into())
    }

    /// Attach conversation context. Empty strings are skipped.
    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        self.with_non_empty(CONVERSATION_CONTEXT, context.into())
    }

    /// Attach an arbitrary key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Get a string value by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// The user name, if present and a string.
    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.get_str(USER_NAME)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Check the bag is acceptable for session creation.
    ///
    /// # Errors
    /// Returns `InvalidState` if `user_name` is missing, not a string, or blank.
    pub fn validate(&self) -> Result<(), SessionError> {
        match self.entries.get(USER_NAME) {
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(()),
            Some(Value::String(_)) => Err(SessionError::InvalidState(
                "user_name must not be empty".to_string(),
            )),
            Some(_) => Err(SessionError::InvalidState(
                "user_name must be a string".to_string(),
            )),
            None => Err(SessionError::InvalidState("user_name is required".to_string())),
        }
    }

    fn with_non_empty(mut self, key: &str, value: String) -> Self {
        if !value.is_empty() {
            self.entries.insert(key.to_string(), Value::String(value));
        }
        self
    }
}

impl From<HashMap<String, Value>> for StateBag {
    fn from(entries: HashMap<String, Value>) -> Self {
        Self { entries }
    }
}

impl FromIterator<(String, Value)> for StateBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
