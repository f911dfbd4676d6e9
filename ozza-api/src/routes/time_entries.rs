/// Time entry endpoints under `/api/projects/:id/time-entries`

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
use chrono::{NaiveDate, Utc};
use ozza_shared::{
    auth::{authorization::ResourcePermission, middleware::AuthContext},
    models::{
        activity_log::{EntityType, NewActivity},
        task::Task,
        time_entry::{CreateTimeEntry, TimeEntry, TimeTotals},
    },
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// One day, the longest single entry
const MAX_MINUTES: i32 = 24 * 60;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTimeEntryRequest {
    pub minutes: i32,

    pub task_id: Option<Uuid>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    #[serde(default = "default_billable")]
    pub billable: bool,

    /// Defaults to today (UTC)
    pub spent_on: Option<NaiveDate>,
}

fn default_billable() -> bool {
    true
}

fn check_minutes(minutes: i32) -> ApiResult<()> {
    if (1..=MAX_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(ApiError::invalid_field(
            "minutes",
            format!("Minutes must be between 1 and {MAX_MINUTES}"),
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct TimeEntryList {
    pub entries: Vec<TimeEntry>,

    pub totals: TimeTotals,
}

pub async fn list_time_entries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TimeEntryList>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let entries = TimeEntry::list_by_project(&state.db, id).await?;
    let totals = TimeEntry::totals_for_project(&state.db, id).await?;

    Ok(Json(TimeEntryList { entries, totals }))
}

/// Time is logged by the caller, for themselves.
pub async fn create_time_entry(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateTimeEntryRequest>,
) -> ApiResult<(StatusCode, Json<TimeEntry>)> {
    req.validate()?;
    check_minutes(req.minutes)?;

    let spent_on = req.spent_on.unwrap_or_else(|| Utc::now().date_naive());
    if spent_on > Utc::now().date_naive() {
        return Err(ApiError::invalid_field("spent_on", "Time cannot be logged in the future"));
    }

    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Comment).await?;

    let mut tx = state.db.begin().await?;

    if let Some(task_id) = req.task_id {
        if Task::find(&mut *tx, id, task_id).await?.is_none() {
            return Err(ApiError::invalid_field("task_id", "Task is not part of this project"));
        }
    }

    let entry = TimeEntry::create(
        &mut *tx,
        CreateTimeEntry {
            project_id: id,
            task_id: req.task_id,
            user_id: auth.user_id,
            minutes: req.minutes,
            description: req.description,
            billable: req.billable,
            spent_on,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(id, auth.user_id, EntityType::TimeEntry, entry.id, &entry),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// Owners of an entry delete it; so does the project team.
pub async fn delete_time_entry(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, entry_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (project, role) = load_project(&state, id, &auth, ResourcePermission::Comment).await?;

    let mut tx = state.db.begin().await?;

    let entry = TimeEntry::find(&mut *tx, id, entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Time entry not found".to_string()))?;

    if entry.user_id != auth.user_id && !role.has_permission(&ResourcePermission::Write.min_role()) {
        return Err(ApiError::Forbidden("Only the owner or the project team can delete this entry".to_string()));
    }

    let deleted = TimeEntry::delete(&mut *tx, id, entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Time entry not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::deleted(id, auth.user_id, EntityType::TimeEntry, entry_id, &deleted),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minutes_bounds() {
        assert!(check_minutes(0).is_err());
        assert!(check_minutes(-15).is_err());
        assert!(check_minutes(1).is_ok());
        assert!(check_minutes(MAX_MINUTES).is_ok());
        assert!(check_minutes(MAX_MINUTES + 1).is_err());
    }

    #[test]
    fn test_billable_by_default() {
        let req: CreateTimeEntryRequest = serde_json::from_value(json!({ "minutes": 30 })).unwrap();
        assert!(req.billable);
        assert_eq!(req.spent_on, None);
    }
}
