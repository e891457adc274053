//! Retry logic for request dispatch
//!
//! Exponential backoff with jitter for transient failures. Only the dispatch of a
//! request is retried: once fragments have been received, a failure aborts the exchange.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{Result, ShapchatError};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: usize,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay
    pub add_jitter: bool,
    /// HTTP statuses that count as transient
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
            // Rate limiting and upstream/gateway failures
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before retry number `retry` (0 is the first retry)
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let millis = (self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.max(1.0).powi(exponent))
        .min(self.max_delay.as_millis() as f64);

        let millis = if self.add_jitter {
            millis * (1.0 + 0.25 * jitter_fraction())
        } else {
            millis
        };

        Duration::from_millis(millis as u64)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Whether a dispatch failure is worth another attempt.
    ///
    /// Transport failures and the configured statuses are; everything else
    /// (bad requests, authentication, local errors) fails immediately.
    pub fn is_transient(&self, error: &ShapchatError) -> bool {
        match error {
            ShapchatError::Provider(_) => true,
            ShapchatError::ProviderStatus { status, .. } => self.is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Fraction in [0, 1) drawn from the clock and a per-process counter
fn jitter_fraction() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static CALLS: AtomicU64 = AtomicU64::new(0);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let calls = CALLS.fetch_add(1, Ordering::Relaxed);
    let mut x = nanos ^ calls.rotate_left(32) ^ 0x9E37_79B9_7F4A_7C15;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;

    (x >> 11) as f64 / (1u64 << 53) as f64
}

/// Attempt counter for one dispatch
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    attempts: usize,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Whether another attempt is allowed
    pub fn should_retry(&self) -> bool {
        self.attempts < self.config.max_attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        self.config.delay_for_attempt(self.attempts.saturating_sub(1))
    }

    /// Attempts made so far
    pub fn current_attempt(&self) -> usize {
        self.attempts
    }
}

/// Run `dispatch` until it succeeds, fails with a non-transient error or the
/// attempts run out. The last error is returned unchanged.
pub async fn retry_dispatch<F, Fut, T>(config: &RetryConfig, dispatch: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = RetryState::new(config.clone());

    loop {
        let error = match dispatch().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        state.record_attempt();

        if !state.should_retry() || !config.is_transient(&error) {
            return Err(error);
        }

        let delay = state.next_delay();
        tracing::debug!(
            attempt = state.current_attempt(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying dispatch after transient failure"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick(attempts: usize) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(attempts)
            .with_jitter(false)
            .with_initial_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(1),
            ..RetryConfig::default().with_jitter(false)
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let delay = config.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(625));
        }
    }

    #[test]
    fn test_transient_errors() {
        let config = RetryConfig::default();

        assert!(config.is_transient(&ShapchatError::Provider("connection reset".into())));
        assert!(config.is_transient(&ShapchatError::ProviderStatus {
            status: 429,
            message: "slow down".into(),
        }));
        assert!(!config.is_transient(&ShapchatError::ProviderStatus {
            status: 401,
            message: "bad key".into(),
        }));
        assert!(!config.is_transient(&ShapchatError::Configuration("no key".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_recovers_from_transient_failures() {
        let attempts = AtomicUsize::new(0);

        let result = retry_dispatch(&quick(3), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ShapchatError::ProviderStatus {
                        status: 503,
                        message: "overloaded".into(),
                    })
                } else {
                    Ok("streaming")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "streaming");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_gives_up_after_max_attempts() {
        let attempts = AtomicUsize::new(0);

        let result: Result<()> = retry_dispatch(&quick(2), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ShapchatError::Provider("connection refused".into())) }
        })
        .await;

        assert!(matches!(result, Err(ShapchatError::Provider(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_permanent_error() {
        let attempts = AtomicUsize::new(0);

        let result: Result<()> = retry_dispatch(&quick(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ShapchatError::ProviderStatus {
                    status: 400,
                    message: "context too long".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_reads_humantime_durations() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 4, "initial_delay": "250ms"}"#).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
