/// Project file endpoints under `/api/projects/:id/files`
///
/// Files live in external storage; rows carry the metadata and the storage
/// URL. The URL is only handed out by the download endpoint, which counts
/// against the owning account's monthly download cap.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::projects::{commit_activity, load_project},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use ozza_shared::{
    auth::{authorization::ResourcePermission, middleware::AuthContext},
    models::{
        activity_log::{EntityType, NewActivity},
        file::{CreateProjectFile, ProjectFile},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 5 GiB
const MAX_FILE_SIZE: i64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFileRequest {
    #[validate(length(min = 1, max = 255, message = "File name must be 1 to 255 characters"))]
    pub file_name: String,

    #[validate(length(min = 1, max = 255))]
    pub content_type: String,

    pub size_bytes: i64,

    pub storage_url: String,
}

impl CreateFileRequest {
    fn check(&self) -> ApiResult<()> {
        self.validate()?;

        if self.file_name.contains(['/', '\\']) {
            return Err(ApiError::invalid_field("file_name", "File name cannot contain path separators"));
        }
        if !(0..=MAX_FILE_SIZE).contains(&self.size_bytes) {
            return Err(ApiError::invalid_field("size_bytes", "File size out of range"));
        }
        match reqwest::Url::parse(&self.storage_url) {
            Ok(url) if url.scheme() == "https" => Ok(()),
            _ => Err(ApiError::invalid_field("storage_url", "Expected an https URL")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    #[serde(flatten)]
    pub file: ProjectFile,

    pub download_url: String,

    /// Downloads counted for the owning account this month, this one included
    pub downloads_this_month: i64,
}

pub async fn list_files(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ProjectFile>>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let files = ProjectFile::list_by_project(&state.db, id).await?;
    Ok(Json(files))
}

pub async fn create_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateFileRequest>,
) -> ApiResult<(StatusCode, Json<ProjectFile>)> {
    req.check()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let file = ProjectFile::create(
        &mut *tx,
        CreateProjectFile {
            project_id: id,
            uploaded_by: auth.user_id,
            file_name: req.file_name.trim().to_string(),
            content_type: req.content_type,
            size_bytes: req.size_bytes,
            storage_url: req.storage_url,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(id, auth.user_id, EntityType::File, file.id, &file),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (project, role) = load_project(&state, id, &auth, ResourcePermission::Comment).await?;

    let mut tx = state.db.begin().await?;

    let file = ProjectFile::find(&mut *tx, id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    if file.uploaded_by != auth.user_id && !role.has_permission(&ResourcePermission::Write.min_role()) {
        return Err(ApiError::Forbidden("Only the uploader or the project team can delete this file".to_string()));
    }

    let deleted = ProjectFile::delete(&mut *tx, id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::deleted(id, auth.user_id, EntityType::File, file_id, &deleted),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// `GET …/:file_id/download`, metered
///
/// Over the cap this answers 429 with `Retry-After` set to the start of
/// next month.
pub async fn download_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DownloadResponse>> {
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let file = ProjectFile::find(&state.db, id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let counter = state.quota.record_download(project.account_id).await?;

    tracing::debug!(file_id = %file_id, account_id = %project.account_id, "File download recorded");

    Ok(Json(DownloadResponse {
        download_url: file.storage_url.clone(),
        downloads_this_month: counter.downloads,
        file,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(file_name: &str, size_bytes: i64, storage_url: &str) -> CreateFileRequest {
        serde_json::from_value(json!({
            "file_name": file_name,
            "content_type": "application/pdf",
            "size_bytes": size_bytes,
            "storage_url": storage_url,
        }))
        .unwrap()
    }

    #[test]
    fn test_create_file_checks() {
        assert!(request("brief.pdf", 1024, "https://cdn.ozza.test/brief.pdf").check().is_ok());
        assert!(request("../brief.pdf", 1024, "https://cdn.ozza.test/b").check().is_err());
        assert!(request("brief.pdf", -1, "https://cdn.ozza.test/b").check().is_err());
        assert!(request("brief.pdf", MAX_FILE_SIZE + 1, "https://cdn.ozza.test/b").check().is_err());
        assert!(request("brief.pdf", 1024, "http://cdn.ozza.test/b").check().is_err());
        assert!(request("brief.pdf", 1024, "not a url").check().is_err());
    }
}
