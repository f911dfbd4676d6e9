/// Comment endpoints under `/api/projects/:id/comments`
///
/// Anyone with comment access may post; a reply's parent must be in the
/// same project. Authors delete their own comments, the project team
/// deletes any.

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
        comment::{Comment, CommentWithAuthor, CreateComment},
    },
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommentRequest {
    #[validate(length(min = 1, max = 10000, message = "Comment must be 1 to 10000 characters"))]
    pub body: String,

    pub parent_comment_id: Option<Uuid>,
}

pub async fn list_comments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<CommentWithAuthor>>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let comments = Comment::list_by_project(&state.db, id).await?;
    Ok(Json(comments))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    req.validate()?;
    let body = req.body.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::invalid_field("body", "Comment cannot be blank"));
    }

    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Comment).await?;

    let mut tx = state.db.begin().await?;

    if let Some(parent_id) = req.parent_comment_id {
        if Comment::find(&mut *tx, id, parent_id).await?.is_none() {
            return Err(ApiError::invalid_field(
                "parent_comment_id",
                "Parent comment is not part of this project",
            ));
        }
    }

    let comment = Comment::create(
        &mut *tx,
        CreateComment {
            project_id: id,
            author_id: auth.user_id,
            parent_comment_id: req.parent_comment_id,
            body,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(id, auth.user_id, EntityType::Comment, comment.id, &comment),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

/// Replies to a deleted comment go with it.
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (project, role) = load_project(&state, id, &auth, ResourcePermission::Comment).await?;

    let mut tx = state.db.begin().await?;

    let comment = Comment::find(&mut *tx, id, comment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    if comment.author_id != auth.user_id && !role.has_permission(&ResourcePermission::Write.min_role()) {
        return Err(ApiError::Forbidden("Only the author or the project team can delete this comment".to_string()));
    }

    let deleted = Comment::delete(&mut *tx, id, comment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::deleted(id, auth.user_id, EntityType::Comment, comment_id, &deleted),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
