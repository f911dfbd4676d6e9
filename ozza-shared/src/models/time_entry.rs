/// Time tracking against a project (and optionally one of its tasks)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const TIME_ENTRY_COLUMNS: &str =
    "id, project_id, task_id, user_id, minutes, description, billable, spent_on, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeEntry {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Option<Uuid>,
    pub user_id: Uuid,
    /// Always positive
    pub minutes: i32,
    pub description: Option<String>,
    pub billable: bool,
    pub spent_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTimeEntry {
    pub project_id: Uuid,
    pub task_id: Option<Uuid>,
    pub user_id: Uuid,
    pub minutes: i32,
    pub description: Option<String>,
    pub billable: bool,
    pub spent_on: NaiveDate,
}

/// Totals for a project, in minutes
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct TimeTotals {
    pub total_minutes: i64,
    pub billable_minutes: i64,
}

impl TimeEntry {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateTimeEntry) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, TimeEntry>(&format!(
            "INSERT INTO time_entries (project_id, task_id, user_id, minutes, description,
                                       billable, spent_on)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {TIME_ENTRY_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.task_id)
        .bind(data.user_id)
        .bind(data.minutes)
        .bind(data.description)
        .bind(data.billable)
        .bind(data.spent_on)
        .fetch_one(db)
        .await
    }

    pub async fn find(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TimeEntry>(&format!(
            "SELECT {TIME_ENTRY_COLUMNS} FROM time_entries WHERE id = $1 AND project_id = $2"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }

    pub async fn list_by_project(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TimeEntry>(&format!(
            "SELECT {TIME_ENTRY_COLUMNS} FROM time_entries
             WHERE project_id = $1
             ORDER BY spent_on DESC, created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(db)
        .await
    }

    pub async fn totals_for_project(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
    ) -> Result<TimeTotals, sqlx::Error> {
        sqlx::query_as::<_, TimeTotals>(
            "SELECT COALESCE(SUM(minutes), 0)::BIGINT AS total_minutes,
                    COALESCE(SUM(minutes) FILTER (WHERE billable), 0)::BIGINT AS billable_minutes
             FROM time_entries
             WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(db)
        .await
    }

    pub async fn delete(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, TimeEntry>(&format!(
            "DELETE FROM time_entries WHERE id = $1 AND project_id = $2
             RETURNING {TIME_ENTRY_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }
}
