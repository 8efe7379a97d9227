use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::{
    clients::store::SubscriptionStore,
    models::subscription::{Subscription, SubscriptionKeys},
};

/// Subscriptions kept in a PostgreSQL table with columns
/// `endpoint` (unique), `expiration_time`, `p256dh` and `auth`.
pub struct PostgresSubscriptionStore {
    client: Client,
    table: String,
}

impl PostgresSubscriptionStore {
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, Error> {
        validate_table_name(table)?;

        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        info!(table, "PostgreSQL connection established");

        Ok(Self {
            client,
            table: table.to_string(),
        })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, Error> {
        let query = format!(
            "SELECT endpoint, expiration_time, p256dh, auth FROM {}",
            self.table
        );

        let rows = self
            .client
            .query(query.as_str(), &[])
            .await
            .map_err(|e| anyhow!("Failed to list subscriptions: {}", e))?;

        let subscriptions = rows.iter().map(subscription_from_row).collect::<Result<Vec<_>, _>>()?;

        debug!(count = subscriptions.len(), "Loaded subscriptions");

        Ok(subscriptions)
    }

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool, Error> {
        let query = format!("DELETE FROM {} WHERE endpoint = $1", self.table);

        let deleted = self
            .client
            .execute(query.as_str(), &[&endpoint])
            .await
            .map_err(|e| {
                error!(error = %e, endpoint, "Failed to delete subscription");
                anyhow!("Database delete failed: {}", e)
            })?;

        debug!(endpoint, deleted, "Subscription delete executed");

        Ok(deleted > 0)
    }
}

/// Missing key columns load as empty strings so the subscription is
/// reported as invalid instead of disappearing from the run.
fn subscription_from_row(row: &Row) -> Result<Subscription, Error> {
    let endpoint: String = row
        .try_get("endpoint")
        .map_err(|e| anyhow!("Subscription row without endpoint: {}", e))?;
    let expiration_time = optional_text(row, &endpoint, "expiration_time");
    let p256dh = optional_text(row, &endpoint, "p256dh");
    let auth = optional_text(row, &endpoint, "auth");

    Ok(Subscription {
        endpoint,
        expiration_time,
        keys: SubscriptionKeys {
            p256dh: p256dh.unwrap_or_default(),
            auth: auth.unwrap_or_default(),
        },
    })
}

fn optional_text(row: &Row, endpoint: &str, column: &str) -> Option<String> {
    match row.try_get::<_, Option<String>>(column) {
        Ok(value) => value,
        Err(e) => {
            warn!(endpoint, column, error = %e, "Unreadable subscription column, treating as empty");
            None
        }
    }
}

fn validate_table_name(table: &str) -> Result<(), Error> {
    let valid = !table.is_empty()
        && table
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));

    if !valid {
        return Err(anyhow!("Invalid subscriptions table name '{}'", table));
    }

    Ok(())
}
