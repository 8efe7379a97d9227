use std::time::Duration;

use thiserror::Error;

use crate::models::status::DeliveryStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Invalid subscriber key material: {0}")]
    CryptoKeyInvalid(String),

    #[error("Invalid subscription endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("VAPID signing failed: {0}")]
    SigningFailure(String),

    #[error("Failed to serialize notification payload: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription is no longer valid (HTTP {0})")]
    ExpiredSubscription(u16),

    #[error("Payload too large ({0} bytes)")]
    PayloadTooLarge(usize),

    #[error("Rate limited by push service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Push service error (HTTP {status})")]
    ServerError {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Rejected by push service (HTTP {status}): {body}")]
    RejectedByService { status: u16, body: String },
}

/// Errors that may be retried after a delay.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl PushError {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            PushError::ExpiredSubscription(_) => DeliveryStatus::Expired,
            PushError::Transport(_)
            | PushError::RateLimited { .. }
            | PushError::ServerError { .. } => DeliveryStatus::TransientFailure,
            _ => DeliveryStatus::PermanentFailure,
        }
    }
}

impl Retryable for PushError {
    fn is_retryable(&self) -> bool {
        self.status() == DeliveryStatus::TransientFailure
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PushError::RateLimited { retry_after } => *retry_after,
            PushError::ServerError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
