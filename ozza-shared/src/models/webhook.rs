/// Outbound webhook endpoints
///
/// Each webhook belongs to one account and subscribes to a list of event
/// names (`task.created`, `deliverable.reviewed`, ...). An empty list
/// subscribes to every event. The signing secret is generated server-side,
/// returned once on creation and never serialized afterwards.
///
/// Signing and delivery live in [`crate::webhooks`].

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const WEBHOOK_COLUMNS: &str = "id, account_id, url, secret, active, events, created_at, updated_at";

/// Secret length in bytes
pub const SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub account_id: Uuid,
    pub url: String,

    #[serde(skip_serializing, default)]
    pub secret: Vec<u8>,

    pub active: bool,
    pub events: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateWebhook {
    pub account_id: Uuid,
    pub url: String,
    pub events: Vec<String>,
}

impl Webhook {
    pub fn generate_secret() -> Vec<u8> {
        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        secret
    }

    /// Hex form of the secret, shown to the owner once at creation
    pub fn secret_hex(&self) -> String {
        hex::encode(&self.secret)
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.active && (self.events.is_empty() || self.events.iter().any(|e| e == event))
    }

    pub async fn create(db: impl PgExecutor<'_>, data: CreateWebhook) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            "INSERT INTO webhooks (account_id, url, secret, events)
             VALUES ($1, $2, $3, $4)
             RETURNING {WEBHOOK_COLUMNS}"
        ))
        .bind(data.account_id)
        .bind(data.url)
        .bind(Self::generate_secret())
        .bind(data.events)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_by_account(db: impl PgExecutor<'_>, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks
             WHERE account_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(db)
        .await
    }

    /// Active webhooks of `account_id` that want `event`
    pub async fn list_for_event(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
        event: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Webhook>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks
             WHERE account_id = $1
               AND active
               AND (cardinality(events) = 0 OR $2 = ANY(events))"
        ))
        .bind(account_id)
        .bind(event)
        .fetch_all(db)
        .await
    }

    pub async fn delete(db: impl PgExecutor<'_>, id: Uuid, account_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1 AND account_id = $2")
            .bind(id)
            .bind(account_id)
            .execute(db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(db: impl PgExecutor<'_>) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhooks WHERE active")
            .fetch_one(db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(events: &[&str]) -> Webhook {
        Webhook {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            url: "https://hooks.example.com/ozza".to_string(),
            secret: Webhook::generate_secret(),
            active: true,
            events: events.iter().map(|e| e.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_secret() {
        let a = Webhook::generate_secret();
        let b = Webhook::generate_secret();
        assert_eq!(a.len(), SECRET_LEN);
        assert_ne!(a, b);
        assert_eq!(webhook(&[]).secret_hex().len(), SECRET_LEN * 2);
    }

    #[test]
    fn test_subscribes_to() {
        let all = webhook(&[]);
        assert!(all.subscribes_to("task.created"));

        let tasks = webhook(&["task.created", "task.updated"]);
        assert!(tasks.subscribes_to("task.updated"));
        assert!(!tasks.subscribes_to("deliverable.reviewed"));

        let mut inactive = webhook(&[]);
        inactive.active = false;
        assert!(!inactive.subscribes_to("task.created"));
    }

    #[test]
    fn test_secret_not_serialized() {
        let json = serde_json::to_value(webhook(&["project.updated"])).unwrap();
        assert!(json.get("secret").is_none());
        assert_eq!(json["events"][0], "project.updated");
    }
}
