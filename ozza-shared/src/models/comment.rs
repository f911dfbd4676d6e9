/// Threaded project comments
///
/// A reply names its parent through `parent_comment_id`; the parent must be
/// in the same project (enforced here and by a database trigger).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const COMMENT_COLUMNS: &str = "id, project_id, author_id, parent_comment_id, body, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateComment {
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub body: String,
}

/// A comment with its author's display name
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CommentWithAuthor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub comment: Comment,
    pub author_name: Option<String>,
    pub author_email: String,
}

impl Comment {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateComment) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            "INSERT INTO comments (project_id, author_id, parent_comment_id, body)
             VALUES ($1, $2, $3, $4)
             RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.author_id)
        .bind(data.parent_comment_id)
        .bind(data.body)
        .fetch_one(db)
        .await
    }

    pub async fn find(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1 AND project_id = $2"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }

    /// Oldest first so threads read top to bottom
    pub async fn list_by_project(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
    ) -> Result<Vec<CommentWithAuthor>, sqlx::Error> {
        sqlx::query_as::<_, CommentWithAuthor>(
            "SELECT c.id, c.project_id, c.author_id, c.parent_comment_id, c.body,
                    c.created_at, c.updated_at,
                    u.name AS author_name, u.email AS author_email
             FROM comments c
             JOIN users u ON u.id = c.author_id
             WHERE c.project_id = $1
             ORDER BY c.created_at ASC",
        )
        .bind(project_id)
        .fetch_all(db)
        .await
    }

    /// Deletes the comment and, through the foreign key, its replies.
    pub async fn delete(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Comment>(&format!(
            "DELETE FROM comments WHERE id = $1 AND project_id = $2 RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }
}
