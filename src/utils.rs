use std::{fmt::Display, future::Future};

use chrono::{DateTime, Utc};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::Config, error::Retryable, models::retry::RetryConfig};

impl RetryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            initial_delay_ms: config.initial_retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
            backoff_multiplier: config.retry_backoff_multiplier,
            max_retry_after_ms: config.max_retry_after_seconds.saturating_mul(1000),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error,
/// exhausts `max_attempts`, or `cancel` fires. Cancellation never interrupts
/// an attempt in flight; it only prevents the next one.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let jitter = rand::random_range(-0.1..=0.1);
                let backoff = Duration::from_millis((delay_ms as f64 * (1.0 + jitter)) as u64);

                let Some(wait) = config.next_delay(backoff, e.retry_after()) else {
                    warn!(
                        retry_after = ?e.retry_after(),
                        max_retry_after_ms = config.max_retry_after_ms,
                        error = %e,
                        "Retry-After exceeds limit, giving up"
                    );
                    return Err(e);
                };

                if cancel.is_cancelled() {
                    debug!(attempt, "Cancelled before retry");
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Retry attempt failed, backing off"
                );

                tokio::select! {
                    _ = sleep(wait) => {}
                    _ = cancel.cancelled() => {
                        debug!(attempt, "Cancelled during backoff");
                        return Err(e);
                    }
                }

                delay_ms = std::cmp::min(
                    delay_ms.saturating_mul(config.backoff_multiplier),
                    config.max_delay_ms,
                );
            }
        }
    }
}

/// Parses a `Retry-After` value given as delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
