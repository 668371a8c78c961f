//! Configuration for the beacon sender.

use crate::error::{EngineError, EngineResult};
use std::time::Duration;

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timing configuration of the sending state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Retry configuration used while initializing.
    pub retry: RetryConfig,
    /// Sleep between two capture-on cycles.
    pub capture_on_interval: Duration,
    /// Interval between status checks.
    pub status_check_interval: Duration,
    /// Interval between time-sync rounds.
    pub time_sync_interval: Duration,
    /// Number of exchanges in one time-sync round.
    pub time_sync_requests: u32,
    /// Retry-after used when a rate-limiting response carries none.
    pub default_retry_after: Duration,
    /// Request timeout handed to HTTP clients.
    pub request_timeout: Duration,
    /// How long shutdown waits for the final flush before detaching the
    /// sender thread.
    pub shutdown_timeout: Duration,
}

impl SenderConfig {
    /// Creates a configuration with the default timings.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            capture_on_interval: Duration::from_secs(1),
            status_check_interval: Duration::from_secs(2 * 60 * 60),
            time_sync_interval: Duration::from_secs(2 * 60 * 60),
            time_sync_requests: 5,
            default_retry_after: Duration::from_secs(10 * 60),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the sleep between capture-on cycles.
    pub fn with_capture_on_interval(mut self, interval: Duration) -> Self {
        self.capture_on_interval = interval;
        self
    }

    /// Sets the status check interval.
    pub fn with_status_check_interval(mut self, interval: Duration) -> Self {
        self.status_check_interval = interval;
        self
    }

    /// Sets the time-sync interval.
    pub fn with_time_sync_interval(mut self, interval: Duration) -> Self {
        self.time_sync_interval = interval;
        self
    }

    /// Sets the number of exchanges per time-sync round.
    pub fn with_time_sync_requests(mut self, requests: u32) -> Self {
        self.time_sync_requests = requests;
        self
    }

    /// Sets the fallback retry-after.
    pub fn with_default_retry_after(mut self, retry_after: Duration) -> Self {
        self.default_retry_after = retry_after;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Checks that the configuration can drive the state machine.
    pub fn validate(&self) -> EngineResult<()> {
        if self.retry.reinit_delays.is_empty() {
            return Err(EngineError::InvalidConfig(
                "reinit delay table is empty".into(),
            ));
        }
        if self.time_sync_requests == 0 {
            return Err(EngineError::InvalidConfig(
                "time sync needs at least one request".into(),
            ));
        }
        if self.capture_on_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "capture-on interval must not be zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "request timeout must not be zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior during initialization.
///
/// One cycle issues a request and up to `max_retries` retries, sleeping
/// `initial_delay * multiplier^n` before retry `n`. Between cycles the
/// sender sleeps for the next entry of `reinit_delays`, staying on the
/// last one once the table is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first request of a cycle.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: u32,
    /// Sleeps between two cycles.
    pub reinit_delays: Vec<Duration>,
}

impl RetryConfig {
    /// Creates a retry configuration with the default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
            reinit_delays: vec![
                Duration::from_secs(60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
                Duration::from_secs(60 * 60),
                Duration::from_secs(2 * 60 * 60),
            ],
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the reinit delay table.
    pub fn with_reinit_delays(mut self, delays: Vec<Duration>) -> Self {
        self.reinit_delays = delays;
        self
    }

    /// Calculates the delay before retry `retry` (0-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(retry);
        self.initial_delay.saturating_mul(factor)
    }

    /// Reinit delay for cycle `index`, clamped to the last table entry.
    pub fn reinit_delay(&self, index: usize) -> Duration {
        self.reinit_delays
            .get(index)
            .or_else(|| self.reinit_delays.last())
            .copied()
            .unwrap_or_default()
    }

    /// Index of the reinit delay following `index`.
    pub fn next_reinit_index(&self, index: usize) -> usize {
        (index + 1).min(self.reinit_delays.len().saturating_sub(1))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_config_builder() {
        let config = SenderConfig::new()
            .with_capture_on_interval(Duration::from_millis(50))
            .with_status_check_interval(Duration::from_secs(60))
            .with_time_sync_requests(3)
            .with_default_retry_after(Duration::from_secs(5));

        assert_eq!(config.capture_on_interval, Duration::from_millis(50));
        assert_eq!(config.status_check_interval, Duration::from_secs(60));
        assert_eq!(config.time_sync_interval, Duration::from_secs(7200));
        assert_eq!(config.time_sync_requests, 3);
        assert_eq!(config.default_retry_after, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::default();
        let delays: Vec<u64> = (0..5)
            .map(|n| config.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn reinit_delay_is_clamped() {
        let config = RetryConfig::default();
        assert_eq!(config.reinit_delay(0), Duration::from_secs(60));
        assert_eq!(config.reinit_delay(4), Duration::from_secs(7200));
        assert_eq!(config.reinit_delay(17), Duration::from_secs(7200));
        assert_eq!(config.next_reinit_index(3), 4);
        assert_eq!(config.next_reinit_index(4), 4);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        assert!(!config.reinit_delays.is_empty());
    }

    #[test]
    fn rejects_unusable_config() {
        let config =
            SenderConfig::new().with_retry(RetryConfig::default().with_reinit_delays(Vec::new()));
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(SenderConfig::new().with_time_sync_requests(0).validate().is_err());
        assert!(SenderConfig::new()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn timeouts() {
        let config = SenderConfig::new();
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));

        let config = config
            .with_request_timeout(Duration::from_secs(2))
            .with_shutdown_timeout(Duration::from_millis(300));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(300));
    }
}
