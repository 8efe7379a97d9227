use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
    pub max_retry_after_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2,
            max_retry_after_ms: 120_000,
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt: the backoff delay, raised to the
    /// server's `Retry-After` hint. `None` when the hint exceeds the cap.
    pub fn next_delay(&self, backoff: Duration, retry_after: Option<Duration>) -> Option<Duration> {
        match retry_after {
            Some(hint) if hint > Duration::from_millis(self.max_retry_after_ms) => None,
            Some(hint) => Some(backoff.max(hint)),
            None => Some(backoff),
        }
    }
}
