//! Client configuration.

use std::time::Duration;

/// Default base URL of the remote agent runtime.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
/// Default agent that new sessions are bound to.
pub const DEFAULT_AGENT_ID: &str = "dynamic_session_agent";
/// Default timeout for chat, list, get and delete.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for session creation.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default concurrency ceiling.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
/// Largest accepted concurrency ceiling, the permit limit of a tokio semaphore.
pub const MAX_CONCURRENCY: usize = usize::MAX >> 3;

/// Client configuration.
///
/// Built once, then shared read-only by every concurrent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    agent_id: String,
    request_timeout: Duration,
    create_timeout: Duration,
    max_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Create a configuration for the given base URL with default settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            agent_id: DEFAULT_AGENT_ID.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Set the agent new sessions are bound to.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Set the timeout for chat, list, get and delete.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the timeout for session creation.
    #[must_use]
    pub const fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set both timeouts at once.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self.create_timeout = timeout;
        self
    }

    /// Set the concurrency ceiling, kept within `1..=MAX_CONCURRENCY`.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Agent new sessions are bound to.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Timeout for chat, list, get and delete.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Timeout for session creation.
    #[must_use]
    pub const fn create_timeout(&self) -> Duration {
        self.create_timeout
    }

    /// Concurrency ceiling, always within `1..=MAX_CONCURRENCY`.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

fn normalize_base_url(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url(), "http://localhost:8000");
        assert_eq!(config.agent_id(), DEFAULT_AGENT_ID);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.create_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_concurrency(), 10);
    }

    #[test]
    fn test_trailing_slashes_trimmed() {
        let config = ClientConfig::new("http://example.test:9000//");
        assert_eq!(config.base_url(), "http://example.test:9000");
    }

    #[test]
    fn test_concurrency_clamped() {
        let config = ClientConfig::default().with_max_concurrency(0);
        assert_eq!(config.max_concurrency(), 1);

        let config = ClientConfig::default().with_max_concurrency(usize::MAX);
        assert_eq!(config.max_concurrency(), MAX_CONCURRENCY);
    }

    #[test]
    fn test_with_timeout_sets_both() {
        let config = ClientConfig::default().with_timeout(Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.create_timeout(), Duration::from_millis(250));
    }
}
