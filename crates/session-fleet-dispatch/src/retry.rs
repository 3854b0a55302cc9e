//! Opt-in retry for idempotent operations.
//!
//! Nothing below the orchestrator retries on its own. Wrap only calls that
//! are safe to repeat (get, list, delete); creating a session or sending a
//! message twice is visible to the remote service.

use std::{future::Future, ops::Range, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};
use session_fleet_core::SessionError;

/// Multipliers applied to a delay when jitter is on.
const JITTER_SPREAD: Range<f64> = 0.5..1.5;

/// Exponential backoff between attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth per further retry.
    pub multiplier: u32,
    /// Upper bound before jitter.
    pub cap: Duration,
    /// Scale each delay by a seeded factor in `[0.5, 1.5)`.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            multiplier: 2,
            cap: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Constant delay without jitter.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            multiplier: 1,
            cap: delay,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// The same `(retry, seed)` pair always yields the same delay.
    #[must_use]
    pub fn delay(&self, retry: u32, seed: u64) -> Duration {
        let grown = self
            .multiplier
            .checked_pow(retry.saturating_sub(1))
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap));
        if !self.jitter {
            return grown;
        }

        let mut rng = StdRng::seed_from_u64(seed ^ u64::from(retry).rotate_left(32));
        let factor = rng.random_range(JITTER_SPREAD);
        Duration::try_from_secs_f64(grown.as_secs_f64() * factor).unwrap_or(grown)
    }
}

/// How many times to attempt an operation and how long to wait between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    jitter_seed: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Policy making at most `max_attempts` attempts (at least one).
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
            jitter_seed: 0,
        }
    }

    /// Policy making exactly one attempt.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1)
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Seed the jitter. Operations retried side by side should use
    /// different seeds so their retries spread out.
    #[must_use]
    pub const fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = seed;
        self
    }

    #[must_use]
    pub const fn jitter_seed(&self) -> u64 {
        self.jitter_seed
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        self.backoff.delay(retry, self.jitter_seed)
    }

    /// Run `op`, retrying while it fails with a retryable error.
    ///
    /// # Errors
    /// Returns the last error once it is not retryable or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        category = err.category(),
                        ?delay,
                        "retrying after failure: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_backoff(Backoff::fixed(Duration::from_millis(1)))
    }

    #[test]
    fn test_delay_without_jitter_doubles_up_to_cap() {
        let backoff = Backoff {
            jitter: false,
            ..Backoff::default()
        };
        assert_eq!(backoff.delay(1, 0), Duration::from_millis(200));
        assert_eq!(backoff.delay(2, 0), Duration::from_millis(400));
        assert_eq!(backoff.delay(3, 0), Duration::from_millis(800));
        assert_eq!(backoff.delay(30, 0), Duration::from_secs(60));
        assert_eq!(backoff.delay(u32::MAX, 0), Duration::from_secs(60));
    }

    #[test]
    fn test_jittered_delay_stays_in_spread() {
        let backoff = Backoff::default();
        for seed in 0..32 {
            let delay = backoff.delay(2, seed);
            assert!(delay >= Duration::from_millis(200), "{delay:?}");
            assert!(delay < Duration::from_millis(600), "{delay:?}");
            assert_eq!(delay, backoff.delay(2, seed));
        }
    }

    #[test]
    fn test_seeds_spread_concurrent_retries() {
        let delays: std::collections::HashSet<Duration> = (0..16)
            .map(|seed| RetryPolicy::new(3).with_jitter_seed(seed).delay_for_attempt(1))
            .collect();
        assert!(delays.len() > 1);
        assert_eq!(RetryPolicy::new(3).with_jitter_seed(9).jitter_seed(), 9);
    }

    #[tokio::test]
    async fn test_retries_network_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SessionError::Unreachable("refused".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SessionError::Timeout(Duration::from_millis(5))) }
            })
            .await;

        assert_eq!(result, Err(SessionError::Timeout(Duration::from_millis(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SessionError::RequestRejected {
                        status: 500,
                        body: String::new(),
                    })
                }
            })
            .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
