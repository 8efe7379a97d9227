use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use chrono::Utc;
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER},
};
use tracing::{debug, info};

use crate::{
    crypto::ece::{CONTENT_ENCODING as AES128GCM, EncryptedMessage},
    error::PushError,
    models::{notification::Urgency, status::DeliveryOutcome, subscription::Subscription},
    utils::parse_retry_after,
};

const MAX_ERROR_BODY_LEN: usize = 512;

/// Sends encrypted messages to push service endpoints.
#[derive(Clone)]
pub struct PushClient {
    http_client: Client,
}

impl PushClient {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        info!(timeout_secs = timeout.as_secs(), "Push client initialized");

        Ok(Self { http_client })
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }

    /// One POST to `endpoint`. `Ok` carries the 2xx status code.
    pub async fn send(
        &self,
        endpoint: &str,
        message: &EncryptedMessage,
        authorization: &str,
        ttl: u32,
        urgency: Urgency,
    ) -> Result<u16, PushError> {
        let body = message.body();
        let body_len = body.len();

        debug!(
            endpoint,
            ttl,
            urgency = %urgency,
            body_len,
            "Sending web push message"
        );

        let response = self
            .http_client
            .post(endpoint)
            .header("TTL", ttl.to_string())
            .header("Urgency", urgency.as_str())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_ENCODING, AES128GCM)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        let body = if response.status().is_success() {
            String::new()
        } else {
            let text = response.text().await.unwrap_or_default();
            text.chars().take(MAX_ERROR_BODY_LEN).collect()
        };

        match classify_response(status, retry_after, body) {
            Err(PushError::PayloadTooLarge(_)) => Err(PushError::PayloadTooLarge(body_len)),
            other => other,
        }
    }

    pub async fn deliver(
        &self,
        subscription: &Subscription,
        message: &EncryptedMessage,
        authorization: &str,
        ttl: u32,
        urgency: Urgency,
    ) -> DeliveryOutcome {
        let result = self
            .send(&subscription.endpoint, message, authorization, ttl, urgency)
            .await;
        DeliveryOutcome::from_result(&subscription.endpoint, result)
    }
}

/// Maps a push service response onto a delivery result.
pub fn classify_response(
    status: u16,
    retry_after: Option<Duration>,
    body: String,
) -> Result<u16, PushError> {
    match status {
        200..=202 => Ok(status),
        404 | 410 => Err(PushError::ExpiredSubscription(status)),
        413 => Err(PushError::PayloadTooLarge(0)),
        429 => Err(PushError::RateLimited { retry_after }),
        500..=599 => Err(PushError::ServerError {
            status,
            retry_after,
        }),
        _ => Err(PushError::RejectedByService { status, body }),
    }
}
