/// File metadata for project attachments
///
/// Bytes live in external object storage; Ozza records where
/// (`storage_url`) and meters every download against the account's plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const FILE_COLUMNS: &str =
    "id, project_id, uploaded_by, file_name, content_type, size_bytes, storage_url, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectFile {
    pub id: Uuid,
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing)]
    pub storage_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateProjectFile {
    pub project_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub storage_url: String,
}

impl ProjectFile {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateProjectFile) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ProjectFile>(&format!(
            "INSERT INTO project_files (project_id, uploaded_by, file_name, content_type,
                                        size_bytes, storage_url)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.uploaded_by)
        .bind(data.file_name)
        .bind(data.content_type)
        .bind(data.size_bytes)
        .bind(data.storage_url)
        .fetch_one(db)
        .await
    }

    pub async fn find(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ProjectFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM project_files WHERE id = $1 AND project_id = $2"
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
        sqlx::query_as::<_, ProjectFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM project_files
             WHERE project_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(project_id)
        .fetch_all(db)
        .await
    }

    pub async fn delete(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ProjectFile>(&format!(
            "DELETE FROM project_files WHERE id = $1 AND project_id = $2 RETURNING {FILE_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }
}
