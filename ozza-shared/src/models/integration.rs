/// Third-party integrations attached to an account
///
/// Active integrations count against the plan's integration cap; see
/// [`crate::quota`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const INTEGRATION_COLUMNS: &str =
    "id, account_id, provider, display_name, config, active, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Integration {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: String,
    pub display_name: String,
    pub config: serde_json::Value,
    pub active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateIntegration {
    pub account_id: Uuid,
    pub provider: String,
    pub display_name: String,
    pub config: serde_json::Value,
    pub created_by: Uuid,
}

impl Integration {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateIntegration) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Integration>(&format!(
            "INSERT INTO integrations (account_id, provider, display_name, config, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {INTEGRATION_COLUMNS}"
        ))
        .bind(data.account_id)
        .bind(data.provider)
        .bind(data.display_name)
        .bind(data.config)
        .bind(data.created_by)
        .fetch_one(db)
        .await
    }

    pub async fn list_by_account(db: impl PgExecutor<'_>, account_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Integration>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations
             WHERE account_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Integration>(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    pub async fn delete(db: impl PgExecutor<'_>, id: Uuid, account_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM integrations WHERE id = $1 AND account_id = $2")
            .bind(id)
            .bind(account_id)
            .execute(db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active(db: impl PgExecutor<'_>, account_id: Uuid) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM integrations WHERE account_id = $1 AND active")
                .bind(account_id)
                .fetch_one(db)
                .await?;
        Ok(count)
    }

    pub async fn count(db: impl PgExecutor<'_>) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM integrations WHERE active")
            .fetch_one(db)
            .await?;
        Ok(count)
    }
}
