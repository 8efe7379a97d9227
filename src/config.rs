use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    crypto::vapid::{REFRESH_MARGIN_SECONDS, VapidSigner},
    fanout::FanoutConfig,
    models::{notification::NotificationData, retry::RetryConfig},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_subscriptions_table")]
    pub subscriptions_table: String,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,
    #[serde(default = "default_max_retry_after_seconds")]
    pub max_retry_after_seconds: u64,

    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    #[serde(default = "default_vapid_token_ttl_seconds")]
    pub vapid_token_ttl_seconds: u64,

    #[serde(default)]
    pub delivery_deadline_seconds: Option<u64>,

    #[serde(default)]
    pub allow_insecure_endpoints: bool,
}

fn default_subscriptions_table() -> String {
    "push_subscriptions".to_string()
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_max_retry_after_seconds() -> u64 {
    120
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_vapid_token_ttl_seconds() -> u64 {
    12 * 60 * 60
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }

        if self.retry_backoff_multiplier == 0 {
            return Err(anyhow!("RETRY_BACKOFF_MULTIPLIER must be at least 1"));
        }

        // Tokens at or below the refresh margin would be re-minted on every request.
        if self.vapid_token_ttl_seconds <= REFRESH_MARGIN_SECONDS as u64 {
            return Err(anyhow!(
                "VAPID_TOKEN_TTL_SECONDS must be greater than {}",
                REFRESH_MARGIN_SECONDS
            ));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from_config(self)
    }

    pub fn fanout_config(&self) -> FanoutConfig {
        FanoutConfig {
            concurrency: self.worker_concurrency,
            retry: self.retry_config(),
            allow_insecure_endpoints: self.allow_insecure_endpoints,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn vapid_token_ttl(&self) -> Duration {
        Duration::from_secs(self.vapid_token_ttl_seconds)
    }

    pub fn delivery_deadline(&self) -> Option<Duration> {
        self.delivery_deadline_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VapidClaimsFile {
    pub sub: String,
}

pub fn load_claims(path: &Path) -> Result<VapidClaimsFile, Error> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read claims file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid claims file {}", path.display()))
}

pub fn load_notification_data(path: &Path) -> Result<NotificationData, Error> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read push data file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid push data file {}", path.display()))
}

/// Loads the VAPID private key as PEM, falling back to a raw base64url scalar.
pub fn load_vapid_signer(path: &Path, subject: &str, token_ttl: Duration) -> Result<VapidSigner, Error> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read VAPID private key {}", path.display()))?;

    let signer = if raw.contains("-----BEGIN") {
        VapidSigner::from_pem(&raw, subject, token_ttl)?
    } else {
        VapidSigner::from_base64url(raw.trim(), subject, token_ttl)?
    };

    Ok(signer)
}
