use std::{
    fmt::{Display, Formatter, Result},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{PushError, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Expired,
    TransientFailure,
    PermanentFailure,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Expired => write!(f, "expired"),
            DeliveryStatus::TransientFailure => write!(f, "transient_failure"),
            DeliveryStatus::PermanentFailure => write!(f, "permanent_failure"),
        }
    }
}

/// Result of dispatching to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub endpoint: String,
    pub status: DeliveryStatus,
    pub status_code: Option<u16>,
    pub retry_after: Option<Duration>,
    pub error: Option<PushError>,
}

impl DeliveryOutcome {
    pub fn delivered(endpoint: &str, status_code: u16) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            status: DeliveryStatus::Delivered,
            status_code: Some(status_code),
            retry_after: None,
            error: None,
        }
    }

    pub fn failed(endpoint: &str, error: PushError) -> Self {
        let status_code = match &error {
            PushError::ExpiredSubscription(code) => Some(*code),
            PushError::RateLimited { .. } => Some(429),
            PushError::ServerError { status, .. } => Some(*status),
            PushError::RejectedByService { status, .. } => Some(*status),
            _ => None,
        };

        Self {
            endpoint: endpoint.to_string(),
            status: error.status(),
            status_code,
            retry_after: error.retry_after(),
            error: Some(error),
        }
    }

    pub fn from_result(endpoint: &str, result: std::result::Result<u16, PushError>) -> Self {
        match result {
            Ok(code) => Self::delivered(endpoint, code),
            Err(e) => Self::failed(endpoint, e),
        }
    }

    /// Splits delivered outcomes from everything else so the retry loop
    /// stops on success.
    pub fn into_result(self) -> std::result::Result<Self, Self> {
        match self.status {
            DeliveryStatus::Delivered => Ok(self),
            _ => Err(self),
        }
    }

    pub fn reason(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None => self.status.to_string(),
        }
    }
}

impl Display for DeliveryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}: {}", self.endpoint, self.reason())
    }
}

impl Retryable for DeliveryOutcome {
    fn is_retryable(&self) -> bool {
        self.status == DeliveryStatus::TransientFailure
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub endpoint: String,
    pub reason: String,
}

/// Aggregate counts for one fan-out run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub total: usize,
    pub delivered: usize,
    pub expired_removed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures: Vec<FailureDetail>,
}

impl DeliverySummary {
    pub fn record_failure(&mut self, endpoint: &str, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(FailureDetail {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        });
    }
}

impl Display for DeliverySummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} delivered, {} expired and removed, {} failed, {} cancelled (of {})",
            self.delivered, self.expired_removed, self.failed, self.cancelled, self.total
        )
    }
}
