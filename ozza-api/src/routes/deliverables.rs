/// Deliverable endpoints under `/api/projects/:id/deliverables`
///
/// The project team moves a deliverable between `pending` and `submitted`;
/// only a review (client level or above) approves or rejects it.

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
        deliverable::{
            CreateDeliverable, Deliverable, DeliverableStatus, ReviewDecision, UpdateDeliverable,
        },
    },
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeliverableRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: String,

    pub description: Option<String>,

    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDeliverableRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,

    pub status: Option<DeliverableStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,

    #[validate(length(max = 2000, message = "Note must be at most 2000 characters"))]
    pub note: Option<String>,
}

pub async fn list_deliverables(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Deliverable>>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let deliverables = Deliverable::list_by_project(&state.db, id).await?;
    Ok(Json(deliverables))
}

pub async fn create_deliverable(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateDeliverableRequest>,
) -> ApiResult<(StatusCode, Json<Deliverable>)> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let deliverable = Deliverable::create(
        &mut *tx,
        CreateDeliverable {
            project_id: id,
            title: req.title.trim().to_string(),
            description: req.description,
            due_date: req.due_date,
            created_by: auth.user_id,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(id, auth.user_id, EntityType::Deliverable, deliverable.id, &deliverable),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(deliverable)))
}

/// `PATCH`; a status outside the team's transitions is a 409.
pub async fn update_deliverable(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, deliverable_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateDeliverableRequest>,
) -> ApiResult<Json<Deliverable>> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let old = Deliverable::find_for_update(&mut *tx, id, deliverable_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Deliverable not found".to_string()))?;

    if let Some(next) = req.status {
        if !old.status.can_move_to(next) {
            return Err(ApiError::Conflict(format!(
                "Cannot move a deliverable from {} to {}",
                old.status.as_str(),
                next.as_str()
            )));
        }
    }

    let new = Deliverable::update(
        &mut *tx,
        id,
        deliverable_id,
        UpdateDeliverable {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            due_date: req.due_date,
            status: req.status.filter(|s| *s != old.status),
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Deliverable not found".to_string()))?;

    let action = if old.status != new.status {
        ActivityAction::StatusChanged
    } else {
        ActivityAction::Updated
    };

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::changed(
            id,
            auth.user_id,
            action,
            EntityType::Deliverable,
            deliverable_id,
            &old,
            &new,
        ),
    )
    .await?;

    Ok(Json(new))
}

/// `POST …/:deliverable_id/review`, approve or reject a submitted deliverable
pub async fn review_deliverable(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, deliverable_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Json<Deliverable>> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Comment).await?;

    let mut tx = state.db.begin().await?;

    let old = Deliverable::find_for_update(&mut *tx, id, deliverable_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Deliverable not found".to_string()))?;

    let reviewed = Deliverable::review(
        &mut *tx,
        id,
        deliverable_id,
        auth.user_id,
        req.decision,
        req.note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
    )
    .await?
    .ok_or_else(|| ApiError::Conflict("Deliverable is not awaiting review".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::changed(
            id,
            auth.user_id,
            ActivityAction::Reviewed,
            EntityType::Deliverable,
            deliverable_id,
            &old,
            &reviewed,
        ),
    )
    .await?;

    tracing::info!(
        deliverable_id = %deliverable_id,
        status = reviewed.status.as_str(),
        "Deliverable reviewed"
    );

    Ok(Json(reviewed))
}

pub async fn delete_deliverable(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, deliverable_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let deleted = Deliverable::delete(&mut *tx, id, deliverable_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Deliverable not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::deleted(id, auth.user_id, EntityType::Deliverable, deliverable_id, &deleted),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
