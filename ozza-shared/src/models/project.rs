/// Projects
///
/// A project belongs to one account (`account_id`) and can be shared with a
/// client account (`client_account_id`). Projects are never hard-deleted
/// through the API: removing one archives it, which keeps its activity log
/// intact.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, account_id, client_account_id, name, description, status, \
     start_date, due_date, budget_cents, created_by, created_at, updated_at";

/// Visibility of project `p` through membership row `m`. A `client` row in
/// the owning account grants nothing; clients see what is shared with their
/// own account.
pub(crate) const MEMBER_SEES_PROJECT: &str = "(m.account_id = p.account_id AND m.role <> 'client') \
     OR m.account_id = p.client_account_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Active => "active",
            ProjectStatus::OnHold => "on_hold",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }

    /// Archived projects are read-only
    pub fn is_open(&self) -> bool {
        !matches!(self, ProjectStatus::Archived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub account_id: Uuid,
    pub client_account_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub budget_cents: Option<i64>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateProject {
    pub account_id: Uuid,
    pub client_account_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub budget_cents: Option<i64>,
    pub created_by: Uuid,
}

/// `None` leaves a column alone; `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    pub client_account_id: Option<Option<Uuid>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub budget_cents: Option<Option<i64>>,
}

/// Filters for [`Project::list_for_user`]
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub account_id: Option<Uuid>,
    pub status: Option<ProjectStatus>,
    pub include_archived: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Project {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateProject) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "INSERT INTO projects (account_id, client_account_id, name, description, status,
                                   start_date, due_date, budget_cents, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(data.account_id)
        .bind(data.client_account_id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.status)
        .bind(data.start_date)
        .bind(data.due_date)
        .bind(data.budget_cents)
        .bind(data.created_by)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Locks the row for the rest of the transaction. Mutations read the
    /// old snapshot through this so the logged `old_value` is exact.
    pub async fn find_for_update(
        db: impl PgExecutor<'_>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Projects visible to `user_id`: owned by an account where they are on
    /// the team, or shared with one of their accounts as the client account.
    pub async fn list_for_user(
        db: impl PgExecutor<'_>,
        user_id: Uuid,
        filter: ProjectFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p
             WHERE EXISTS (
                 SELECT 1 FROM ozza_account_members m
                 WHERE m.user_id = "
        ));
        query.push_bind(user_id);
        query.push(format!(" AND ({MEMBER_SEES_PROJECT}))"));

        if let Some(account_id) = filter.account_id {
            query.push(" AND p.account_id = ").push_bind(account_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND p.status = ").push_bind(status);
        } else if !filter.include_archived {
            query.push(" AND p.status <> 'archived'");
        }

        query.push(" ORDER BY p.created_at DESC LIMIT ").push_bind(filter.limit);
        query.push(" OFFSET ").push_bind(filter.offset);

        query.build_query_as::<Project>().fetch_all(db).await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        id: Uuid,
        data: UpdateProject,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE projects SET updated_at = NOW()");

        if let Some(name) = data.name {
            query.push(", name = ").push_bind(name);
        }
        if let Some(description) = data.description {
            query.push(", description = ").push_bind(description);
        }
        if let Some(status) = data.status {
            query.push(", status = ").push_bind(status);
        }
        if let Some(client_account_id) = data.client_account_id {
            query.push(", client_account_id = ").push_bind(client_account_id);
        }
        if let Some(start_date) = data.start_date {
            query.push(", start_date = ").push_bind(start_date);
        }
        if let Some(due_date) = data.due_date {
            query.push(", due_date = ").push_bind(due_date);
        }
        if let Some(budget_cents) = data.budget_cents {
            query.push(", budget_cents = ").push_bind(budget_cents);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(format!(" RETURNING {PROJECT_COLUMNS}"));

        query.build_query_as::<Project>().fetch_optional(db).await
    }

    /// Sets status to `archived`; returns the archived row.
    pub async fn archive(db: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(&format!(
            "UPDATE projects SET status = 'archived', updated_at = NOW()
             WHERE id = $1
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Open (non-archived) projects owned by the account; checked against plan limits
    pub async fn count_open_for_account(
        db: impl PgExecutor<'_>,
        account_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM projects WHERE account_id = $1 AND status <> 'archived'",
        )
        .bind(account_id)
        .fetch_one(db)
        .await
    }

    /// Project counts per status across every project the user can see
    pub async fn status_counts_for_user(
        db: impl PgExecutor<'_>,
        user_id: Uuid,
    ) -> Result<Vec<(ProjectStatus, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (ProjectStatus, i64)>(&format!(
            "SELECT p.status, COUNT(*)
             FROM projects p
             WHERE EXISTS (
                 SELECT 1 FROM ozza_account_members m
                 WHERE m.user_id = $1
                   AND ({MEMBER_SEES_PROJECT})
             )
             GROUP BY p.status
             ORDER BY p.status",
        ))
        .bind(user_id)
        .fetch_all(db)
        .await
    }

    pub async fn count(db: impl PgExecutor<'_>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM projects").fetch_one(db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization_uses_snake_case() {
        assert_eq!(
            serde_json::to_value(ProjectStatus::OnHold).unwrap(),
            serde_json::json!("on_hold")
        );
        let parsed: ProjectStatus = serde_json::from_str("\"planning\"").unwrap();
        assert_eq!(parsed, ProjectStatus::Planning);
        assert_eq!(ProjectStatus::OnHold.as_str(), "on_hold");
    }

    #[test]
    fn test_archived_is_not_open() {
        assert!(ProjectStatus::Active.is_open());
        assert!(ProjectStatus::Completed.is_open());
        assert!(!ProjectStatus::Archived.is_open());
    }
}
