/// Project milestones, ordered by `position`

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

const MILESTONE_COLUMNS: &str =
    "id, project_id, title, description, due_date, position, completed_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Milestone {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub position: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMilestone {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    /// Appended after the last milestone when `None`
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMilestone {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub position: Option<i32>,
    /// `Some(true)` stamps `completed_at`, `Some(false)` clears it
    pub completed: Option<bool>,
}

impl Milestone {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateMilestone) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(&format!(
            "INSERT INTO milestones (project_id, title, description, due_date, position)
             VALUES ($1, $2, $3, $4,
                     COALESCE($5, (SELECT COALESCE(MAX(position) + 1, 0)
                                   FROM milestones WHERE project_id = $1)))
             RETURNING {MILESTONE_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.due_date)
        .bind(data.position)
        .fetch_one(db)
        .await
    }

    pub async fn find(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(&format!(
            "SELECT {MILESTONE_COLUMNS} FROM milestones WHERE id = $1 AND project_id = $2"
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
        sqlx::query_as::<_, Milestone>(&format!(
            "SELECT {MILESTONE_COLUMNS} FROM milestones
             WHERE project_id = $1
             ORDER BY position ASC, created_at ASC"
        ))
        .bind(project_id)
        .fetch_all(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
        data: UpdateMilestone,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE milestones SET updated_at = NOW()");

        if let Some(title) = data.title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(description) = data.description {
            query.push(", description = ").push_bind(description);
        }
        if let Some(due_date) = data.due_date {
            query.push(", due_date = ").push_bind(due_date);
        }
        if let Some(position) = data.position {
            query.push(", position = ").push_bind(position);
        }
        match data.completed {
            Some(true) => {
                query.push(", completed_at = COALESCE(completed_at, NOW())");
            }
            Some(false) => {
                query.push(", completed_at = NULL");
            }
            None => {}
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" AND project_id = ").push_bind(project_id);
        query.push(format!(" RETURNING {MILESTONE_COLUMNS}"));

        query.build_query_as::<Milestone>().fetch_optional(db).await
    }

    /// Deletes and returns the removed row. Tasks keep existing with `milestone_id` cleared.
    pub async fn delete(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Milestone>(&format!(
            "DELETE FROM milestones WHERE id = $1 AND project_id = $2 RETURNING {MILESTONE_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }
}
