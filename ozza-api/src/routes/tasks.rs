/// Task endpoints under `/api/projects/:id/tasks`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{
        double_option,
        projects::{commit_activity, load_project},
    },
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use ozza_shared::{
    auth::{
        authorization::{project_role, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        activity_log::{ActivityAction, EntityType, NewActivity},
        milestone::Milestone,
        project::Project,
        task::{CreateTask, Task, TaskPriority, TaskStatus, UpdateTask},
    },
};
use serde::Deserialize;
use sqlx::PgConnection;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: String,

    pub description: Option<String>,

    pub milestone_id: Option<Uuid>,

    pub priority: Option<TaskPriority>,

    pub assignee_id: Option<Uuid>,

    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1 to 200 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub milestone_id: Option<Option<Uuid>>,

    pub status: Option<TaskStatus>,

    pub priority: Option<TaskPriority>,

    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<Uuid>>,

    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

/// Milestone and assignee must belong to the task's project.
async fn check_references(
    conn: &mut PgConnection,
    project: &Project,
    milestone_id: Option<Uuid>,
    assignee_id: Option<Uuid>,
) -> ApiResult<()> {
    if let Some(milestone_id) = milestone_id {
        if Milestone::find(&mut *conn, project.id, milestone_id).await?.is_none() {
            return Err(ApiError::invalid_field("milestone_id", "Milestone is not part of this project"));
        }
    }

    if let Some(assignee_id) = assignee_id {
        if project_role(&mut *conn, project, assignee_id).await?.is_none() {
            return Err(ApiError::invalid_field("assignee_id", "Assignee has no access to this project"));
        }
    }

    Ok(())
}

/// `GET /api/projects/:id/tasks?status=`
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let tasks = Task::list_by_project(&state.db, id, query.status).await?;
    Ok(Json(tasks))
}

pub async fn create_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    check_references(&mut *tx, &project, req.milestone_id, req.assignee_id).await?;

    let task = Task::create(
        &mut *tx,
        CreateTask {
            project_id: id,
            milestone_id: req.milestone_id,
            title: req.title.trim().to_string(),
            description: req.description,
            priority: req.priority.unwrap_or(TaskPriority::Medium),
            assignee_id: req.assignee_id,
            due_date: req.due_date,
            created_by: auth.user_id,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(id, auth.user_id, EntityType::Task, task.id, &task),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// Status changes are logged as `status_changed`, everything else as `updated`.
pub async fn update_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    req.validate()?;
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    check_references(
        &mut *tx,
        &project,
        req.milestone_id.flatten(),
        req.assignee_id.flatten(),
    )
    .await?;

    let old = Task::find(&mut *tx, id, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    let new = Task::update(
        &mut *tx,
        id,
        task_id,
        UpdateTask {
            milestone_id: req.milestone_id,
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            status: req.status,
            priority: req.priority,
            assignee_id: req.assignee_id,
            due_date: req.due_date,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    let action = if old.status != new.status {
        ActivityAction::StatusChanged
    } else {
        ActivityAction::Updated
    };

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::changed(id, auth.user_id, action, EntityType::Task, task_id, &old, &new),
    )
    .await?;

    Ok(Json(new))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let (project, _) = load_project(&state, id, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let deleted = Task::delete(&mut *tx, id, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::deleted(id, auth.user_id, EntityType::Task, task_id, &deleted),
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}
