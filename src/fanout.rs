//! Delivers one notification to every stored subscription.
//!
//! Deliveries run concurrently up to `FanoutConfig::concurrency`; their
//! results are consumed by a single collector that builds the summary.
//! Cancelling the token stops new attempts (including retries) while
//! requests already on the wire are allowed to finish and are recorded.

use std::{collections::HashSet, sync::Arc};

use anyhow::{Error, Result};
use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{push::PushClient, store::SubscriptionStore},
    crypto::{ece::PayloadEncryptor, vapid::VapidSigner},
    models::{
        notification::NotificationRequest,
        retry::RetryConfig,
        status::{DeliveryOutcome, DeliveryStatus, DeliverySummary},
        subscription::Subscription,
        validation::{audience, validate_endpoint},
    },
    utils::retry_with_backoff,
};

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub allow_insecure_endpoints: bool,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry: RetryConfig::default(),
            allow_insecure_endpoints: false,
        }
    }
}

#[derive(Debug)]
enum Disposition {
    Delivered,
    Removed,
    Failed(String),
    Cancelled,
}

pub struct FanoutCoordinator {
    store: Arc<dyn SubscriptionStore>,
    push_client: PushClient,
    signer: Arc<VapidSigner>,
    encryptor: PayloadEncryptor,
    config: FanoutConfig,
}

impl FanoutCoordinator {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        push_client: PushClient,
        signer: Arc<VapidSigner>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            store,
            push_client,
            signer,
            encryptor: PayloadEncryptor::default(),
            config,
        }
    }

    pub fn with_encryptor(mut self, encryptor: PayloadEncryptor) -> Self {
        self.encryptor = encryptor;
        self
    }

    /// Sends `request` to every subscription in the store.
    ///
    /// Per-subscription problems only show up in the summary. The run
    /// itself fails only when the store cannot be listed; VAPID key material
    /// is already validated when the signer is built.
    pub async fn run(
        &self,
        request: &NotificationRequest,
        cancel: CancellationToken,
    ) -> Result<DeliverySummary, Error> {
        let run_id = Uuid::new_v4();

        let subscriptions = dedup_by_endpoint(self.store.list_subscriptions().await?);

        info!(
            %run_id,
            subscriptions = subscriptions.len(),
            concurrency = self.config.concurrency,
            ttl = request.ttl,
            urgency = %request.urgency,
            "Starting push fan-out"
        );

        let mut summary = DeliverySummary {
            total: subscriptions.len(),
            ..Default::default()
        };

        let mut results = stream::iter(subscriptions)
            .map(|subscription| {
                let cancel = &cancel;
                async move {
                    let disposition = self.deliver_one(&subscription, request, cancel).await;
                    (subscription.endpoint, disposition)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some((endpoint, disposition)) = results.next().await {
            match disposition {
                Disposition::Delivered => summary.delivered += 1,
                Disposition::Removed => summary.expired_removed += 1,
                Disposition::Cancelled => summary.cancelled += 1,
                Disposition::Failed(reason) => {
                    debug!(%run_id, endpoint = %endpoint, reason = %reason, "Delivery failed");
                    summary.record_failure(&endpoint, reason);
                }
            }
        }

        info!(
            %run_id,
            delivered = summary.delivered,
            expired_removed = summary.expired_removed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Push fan-out finished"
        );

        Ok(summary)
    }

    async fn deliver_one(
        &self,
        subscription: &Subscription,
        request: &NotificationRequest,
        cancel: &CancellationToken,
    ) -> Disposition {
        let endpoint = subscription.endpoint.as_str();

        if cancel.is_cancelled() {
            return Disposition::Cancelled;
        }

        let url = match validate_endpoint(endpoint, self.config.allow_insecure_endpoints) {
            Ok(url) => url,
            Err(e) => {
                warn!(endpoint, error = %e, "Skipping subscription");
                return Disposition::Failed(e.to_string());
            }
        };

        let message = match subscription
            .subscriber_keys()
            .and_then(|keys| self.encryptor.encrypt_notification(request, &keys))
        {
            Ok(message) => message,
            Err(e) => {
                warn!(endpoint, error = %e, "Skipping subscription");
                return Disposition::Failed(e.to_string());
            }
        };

        let aud = audience(&url);
        let aud = aud.as_str();
        let message = &message;
        let signer = self.signer.as_ref();
        let push_client = &self.push_client;
        let (ttl, urgency) = (request.ttl, request.urgency);

        let outcome = match retry_with_backoff(&self.config.retry, cancel, move || async move {
            let authorization = match signer.authorization(aud).await {
                Ok(authorization) => authorization,
                Err(e) => return Err(DeliveryOutcome::failed(endpoint, e)),
            };

            push_client
                .deliver(subscription, message, &authorization, ttl, urgency)
                .await
                .into_result()
        })
        .await
        {
            Ok(outcome) | Err(outcome) => outcome,
        };

        match outcome.status {
            DeliveryStatus::Delivered => {
                info!(endpoint, status = ?outcome.status_code, "Push notification delivered");
                Disposition::Delivered
            }
            DeliveryStatus::Expired => match self.store.delete_subscription(endpoint).await {
                Ok(removed) => {
                    info!(endpoint, status = ?outcome.status_code, removed, "Removed expired subscription");
                    Disposition::Removed
                }
                Err(e) => {
                    warn!(endpoint, error = %e, "Failed to remove expired subscription");
                    Disposition::Failed(format!("Expired but not removed: {}", e))
                }
            },
            DeliveryStatus::TransientFailure | DeliveryStatus::PermanentFailure => {
                let reason = outcome.reason();
                warn!(endpoint, error = %reason, status = %outcome.status, "Push notification failed");
                Disposition::Failed(reason)
            }
        }
    }
}

/// Keeps the first subscription seen for each endpoint.
fn dedup_by_endpoint(subscriptions: Vec<Subscription>) -> Vec<Subscription> {
    let mut seen = HashSet::new();
    let before = subscriptions.len();

    let unique: Vec<Subscription> = subscriptions
        .into_iter()
        .filter(|s| seen.insert(s.endpoint.clone()))
        .collect();

    if unique.len() < before {
        debug!(duplicates = before - unique.len(), "Dropped duplicate subscriptions");
    }

    unique
}
