use std::collections::HashMap;

use anyhow::{Error, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::subscription::Subscription;

/// Where push subscriptions live. Deletion is idempotent: removing an
/// endpoint that is already gone returns `Ok(false)`, never an error.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, Error>;

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool, Error>;
}

/// In-process store keyed by endpoint.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<HashMap<String, Subscription>>,
}

impl MemorySubscriptionStore {
    pub fn new(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let subscriptions = subscriptions
            .into_iter()
            .map(|s| (s.endpoint.clone(), s))
            .collect();

        Self {
            subscriptions: RwLock::new(subscriptions),
        }
    }

    pub async fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.endpoint.clone(), subscription);
    }

    pub async fn contains(&self, endpoint: &str) -> bool {
        self.subscriptions.read().await.contains_key(endpoint)
    }

    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, Error> {
        let mut subscriptions: Vec<Subscription> =
            self.subscriptions.read().await.values().cloned().collect();
        subscriptions.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(subscriptions)
    }

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool, Error> {
        Ok(self.subscriptions.write().await.remove(endpoint).is_some())
    }
}
