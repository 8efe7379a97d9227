use serde::{Deserialize, Serialize};

use crate::{crypto::keys::SubscriberKeys, error::PushError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// One browser's push registration, as stored by the subscribing front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub endpoint: String,

    #[serde(default)]
    pub expiration_time: Option<String>,

    pub keys: SubscriptionKeys,
}

impl Subscription {
    pub fn new(endpoint: impl Into<String>, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            },
        }
    }

    /// Decodes and validates the subscriber's key agreement material.
    pub fn subscriber_keys(&self) -> Result<SubscriberKeys, PushError> {
        SubscriberKeys::from_base64url(&self.keys.p256dh, &self.keys.auth)
    }
}
