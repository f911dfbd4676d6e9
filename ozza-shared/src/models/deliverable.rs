/// Deliverables and their review cycle
///
/// `pending → submitted → approved | rejected`. A rejected deliverable can be
/// resubmitted. Review stamps `reviewed_by`/`reviewed_at` and an optional note.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

const DELIVERABLE_COLUMNS: &str = "id, project_id, title, description, status, due_date, \
     submitted_at, reviewed_by, reviewed_at, review_note, created_by, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "deliverable_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliverableStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
}

impl DeliverableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliverableStatus::Pending => "pending",
            DeliverableStatus::Submitted => "submitted",
            DeliverableStatus::Approved => "approved",
            DeliverableStatus::Rejected => "rejected",
        }
    }

    /// Transitions the owning team may make directly. Approval and rejection
    /// only happen through [`Deliverable::review`].
    pub fn can_move_to(&self, next: DeliverableStatus) -> bool {
        use DeliverableStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted) | (Rejected, Submitted) | (Submitted, Pending) | (Rejected, Pending)
        ) || *self == next
    }
}

/// Outcome of a client review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn resulting_status(&self) -> DeliverableStatus {
        match self {
            ReviewDecision::Approve => DeliverableStatus::Approved,
            ReviewDecision::Reject => DeliverableStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deliverable {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: DeliverableStatus,
    pub due_date: Option<NaiveDate>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDeliverable {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDeliverable {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub status: Option<DeliverableStatus>,
}

impl Deliverable {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateDeliverable) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Deliverable>(&format!(
            "INSERT INTO deliverables (project_id, title, description, due_date, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {DELIVERABLE_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.due_date)
        .bind(data.created_by)
        .fetch_one(db)
        .await
    }

    /// Row-locking lookup used before status changes
    pub async fn find_for_update(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Deliverable>(&format!(
            "SELECT {DELIVERABLE_COLUMNS} FROM deliverables
             WHERE id = $1 AND project_id = $2
             FOR UPDATE"
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
        sqlx::query_as::<_, Deliverable>(&format!(
            "SELECT {DELIVERABLE_COLUMNS} FROM deliverables
             WHERE project_id = $1
             ORDER BY created_at ASC"
        ))
        .bind(project_id)
        .fetch_all(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
        data: UpdateDeliverable,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE deliverables SET updated_at = NOW()");

        if let Some(title) = data.title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(description) = data.description {
            query.push(", description = ").push_bind(description);
        }
        if let Some(due_date) = data.due_date {
            query.push(", due_date = ").push_bind(due_date);
        }
        if let Some(status) = data.status {
            query.push(", status = ").push_bind(status);
            if status == DeliverableStatus::Submitted {
                query.push(", submitted_at = NOW(), reviewed_by = NULL, reviewed_at = NULL");
            }
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" AND project_id = ").push_bind(project_id);
        query.push(format!(" RETURNING {DELIVERABLE_COLUMNS}"));

        query.build_query_as::<Deliverable>().fetch_optional(db).await
    }

    /// Approves or rejects a submitted deliverable. Returns `None` when the
    /// deliverable is missing or not in `submitted`.
    pub async fn review(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
        reviewer_id: Uuid,
        decision: ReviewDecision,
        note: Option<String>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Deliverable>(&format!(
            "UPDATE deliverables
             SET status = $4, reviewed_by = $3, reviewed_at = NOW(), review_note = $5,
                 updated_at = NOW()
             WHERE id = $1 AND project_id = $2 AND status = 'submitted'
             RETURNING {DELIVERABLE_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .bind(reviewer_id)
        .bind(decision.resulting_status())
        .bind(note)
        .fetch_optional(db)
        .await
    }

    pub async fn delete(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Deliverable>(&format!(
            "DELETE FROM deliverables WHERE id = $1 AND project_id = $2
             RETURNING {DELIVERABLE_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }

    /// Submitted deliverables waiting on a client the user represents
    pub async fn count_awaiting_review_for_user(
        db: impl PgExecutor<'_>,
        user_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM deliverables d
             JOIN projects p ON p.id = d.project_id
             JOIN ozza_account_members m ON m.account_id = p.client_account_id
             WHERE m.user_id = $1 AND d.status = 'submitted'",
        )
        .bind(user_id)
        .fetch_one(db)
        .await
    }
}
