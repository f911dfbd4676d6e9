/// Milestone endpoints under `/api/projects/:id/milestones`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{
        double_option,
        projects::{commit_activity, load_project},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use ozza_shared::{
    auth::{authorization::ResourcePermission, middleware::AuthContext},
    models::{
        activity_log::{ActivityAction, EntityType, NewActivity},
        milestone::{CreateMilestone, Milestone, UpdateMilestone},
    },
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMilestoneRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: String,

    pub description: Option<String>,

    pub due_date: Option<NaiveDate>,

    #[validate(range(min = 0))]
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMilestoneRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,

    #[validate(range(min = 0))]
    pub position: Option<i32>,

    pub completed: Option<bool>,
}

pub async fn list_milestones(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Milestone>>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let milestones = Milestone::list_by_project(&state.db, id).await?;
    Ok(Json(milestones))
}

pub async fn create_milestone(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateMilestoneRequest>,
) -> ApiResult<(StatusCode, Json<Milestone>)> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let milestone = Milestone::create(
        &mut *tx,
        CreateMilestone {
            project_id: id,
            title: req.title.trim().to_string(),
            description: req.description,
            due_date: req.due_date,
            position: req.position,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(id, auth.user_id, EntityType::Milestone, milestone.id, &milestone),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(milestone)))
}

/// Completing or reopening a milestone is logged as a status change.
pub async fn update_milestone(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, milestone_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateMilestoneRequest>,
) -> ApiResult<Json<Milestone>> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let old = Milestone::find(&mut *tx, id, milestone_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Milestone not found".to_string()))?;

    let new = Milestone::update(
        &mut *tx,
        id,
        milestone_id,
        UpdateMilestone {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            due_date: req.due_date,
            position: req.position,
            completed: req.completed,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Milestone not found".to_string()))?;

    let action = if old.completed_at.is_some() != new.completed_at.is_some() {
        ActivityAction::StatusChanged
    } else {
        ActivityAction::Updated
    };

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::changed(id, auth.user_id, action, EntityType::Milestone, milestone_id, &old, &new),
    )
    .await?;

    Ok(Json(new))
}

/// Tasks of a deleted milestone stay in the project, unassigned.
pub async fn delete_milestone(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, milestone_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let deleted = Milestone::delete(&mut *tx, id, milestone_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Milestone not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::deleted(id, auth.user_id, EntityType::Milestone, milestone_id, &deleted),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
