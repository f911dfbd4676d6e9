/// Project endpoints
///
/// Projects belong to an agency (or coach) account and may be shared with
/// one client account. Every mutation appends an activity entry inside the
/// same transaction; webhooks for it are dispatched after commit.
///
/// `DELETE /api/projects/:id` archives: the activity history of a project
/// is never removed through the API.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{double_option, notify_activity, Pagination},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use ozza_shared::{
    auth::{
        authorization::{require_project_access, require_role, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        account::Account,
        activity_log::{ActivityAction, ActivityLog, EntityType, NewActivity},
        membership::MemberRole,
        project::{CreateProject, Project, ProjectFilter, ProjectStatus, UpdateProject},
        task::{Task, TaskCounts},
        time_entry::{TimeEntry, TimeTotals},
    },
    quota::{enforce_cap, QuotaType},
};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

/// Loads a project and checks `permission` for the caller.
///
/// Archived projects are read-only.
pub(crate) async fn load_project(
    state: &AppState,
    id: Uuid,
    auth: &AuthContext,
    permission: ResourcePermission,
) -> ApiResult<(Project, MemberRole)> {
    let project = Project::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    let role = require_project_access(&state.db, &project, auth, permission).await?;

    if permission != ResourcePermission::Read && !project.status.is_open() {
        return Err(ApiError::Conflict("Project is archived".to_string()));
    }

    Ok((project, role))
}

/// Appends `entry`, commits `tx` and fires the matching webhook.
pub(crate) async fn commit_activity(
    state: &AppState,
    mut tx: Transaction<'_, Postgres>,
    account_id: Uuid,
    entry: NewActivity,
) -> ApiResult<ActivityLog> {
    let logged = ActivityLog::record(&mut *tx, entry).await?;
    tx.commit().await?;

    tracing::debug!(
        project_id = %logged.project_id,
        entity_type = %logged.entity_type,
        action = %logged.action,
        "Activity recorded"
    );

    notify_activity(state, account_id, &logged);
    Ok(logged)
}

fn check_dates(start: Option<NaiveDate>, due: Option<NaiveDate>) -> ApiResult<()> {
    match (start, due) {
        (Some(start), Some(due)) if due < start => Err(ApiError::invalid_field(
            "due_date",
            "Due date cannot be before the start date",
        )),
        _ => Ok(()),
    }
}

/// A client account may only be attached to a project of its parent.
async fn check_client_account(state: &AppState, account_id: Uuid, client_account_id: Uuid) -> ApiResult<()> {
    let client = Account::find_by_id(&state.db, client_account_id)
        .await?
        .ok_or_else(|| ApiError::invalid_field("client_account_id", "Unknown account"))?;

    if client.parent_account_id != Some(account_id) {
        return Err(ApiError::invalid_field(
            "client_account_id",
            "Client account is not a child of the project account",
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub account_id: Option<Uuid>,

    pub status: Option<ProjectStatus>,

    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    pub account_id: Uuid,

    pub client_account_id: Option<Uuid>,

    #[validate(length(min = 1, max = 200, message = "Name must be 1 to 200 characters"))]
    pub name: String,

    #[validate(length(max = 10000))]
    pub description: Option<String>,

    pub status: Option<ProjectStatus>,

    pub start_date: Option<NaiveDate>,

    pub due_date: Option<NaiveDate>,

    #[validate(range(min = 0, message = "Budget cannot be negative"))]
    pub budget_cents: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1 to 200 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    pub status: Option<ProjectStatus>,

    #[serde(default, deserialize_with = "double_option")]
    pub client_account_id: Option<Option<Uuid>>,

    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub budget_cents: Option<Option<i64>>,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,

    /// The caller's effective role on this project
    pub role: MemberRole,

    pub tasks: TaskCounts,

    pub time: TimeTotals,
}

/// `GET /api/projects`
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListProjectsQuery>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<Project>>> {
    let projects = Project::list_for_user(
        &state.db,
        auth.user_id,
        ProjectFilter {
            account_id: query.account_id,
            status: query.status,
            include_archived: query.include_archived,
            limit: page.limit(),
            offset: page.offset(),
        },
    )
    .await?;

    Ok(Json(projects))
}

/// `POST /api/projects`
///
/// Needs agency level in the owning account. The plan's project cap is
/// checked under a lock on the account row.
pub async fn create_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    req.validate()?;
    check_dates(req.start_date, req.due_date)?;

    require_role(&state.db, req.account_id, auth.user_id, ResourcePermission::Write.min_role()).await?;

    if let Some(client_account_id) = req.client_account_id {
        check_client_account(&state, req.account_id, client_account_id).await?;
    }

    let status = req.status.unwrap_or(ProjectStatus::Planning);
    if !status.is_open() {
        return Err(ApiError::invalid_field("status", "A new project cannot be archived"));
    }

    let mut tx = state.db.begin().await?;

    enforce_cap(&mut *tx, req.account_id, QuotaType::Projects).await?;

    let project = Project::create(
        &mut *tx,
        CreateProject {
            account_id: req.account_id,
            client_account_id: req.client_account_id,
            name: req.name.trim().to_string(),
            description: req.description,
            status,
            start_date: req.start_date,
            due_date: req.due_date,
            budget_cents: req.budget_cents,
            created_by: auth.user_id,
        },
    )
    .await?;

    commit_activity(
        &state,
        tx,
        project.account_id,
        NewActivity::created(project.id, auth.user_id, EntityType::Project, project.id, &project),
    )
    .await?;

    tracing::info!(project_id = %project.id, account_id = %project.account_id, "Project created");

    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProjectDetail>> {
    let (project, role) = load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let tasks = Task::counts_for_project(&state.db, id).await?;
    let time = TimeEntry::totals_for_project(&state.db, id).await?;

    Ok(Json(ProjectDetail {
        project,
        role,
        tasks,
        time,
    }))
}

/// `PATCH /api/projects/:id`
///
/// Archiving through a status change needs manage rights; restoring an
/// archived project counts against the project cap again.
pub async fn update_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult<Json<Project>> {
    req.validate()?;
    if matches!(req.budget_cents, Some(Some(b)) if b < 0) {
        return Err(ApiError::invalid_field("budget_cents", "Budget cannot be negative"));
    }

    let project = Project::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    let permission = match req.status {
        Some(ProjectStatus::Archived) => ResourcePermission::Manage,
        _ => ResourcePermission::Write,
    };
    require_project_access(&state.db, &project, &auth, permission).await?;

    if let Some(Some(client_account_id)) = req.client_account_id {
        check_client_account(&state, project.account_id, client_account_id).await?;
    }

    let mut tx = state.db.begin().await?;

    let old = Project::find_for_update(&mut *tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    let start = req.start_date.unwrap_or(old.start_date);
    let due = req.due_date.unwrap_or(old.due_date);
    check_dates(start, due)?;

    if !old.status.is_open() && req.status.is_some_and(|s| s.is_open()) {
        enforce_cap(&mut *tx, old.account_id, QuotaType::Projects).await?;
    } else if !old.status.is_open() {
        return Err(ApiError::Conflict("Project is archived".to_string()));
    }

    let status_changed = req.status.is_some_and(|s| s != old.status);

    let new = Project::update(
        &mut *tx,
        id,
        UpdateProject {
            name: req.name.map(|n| n.trim().to_string()),
            description: req.description,
            status: req.status,
            client_account_id: req.client_account_id,
            start_date: req.start_date,
            due_date: req.due_date,
            budget_cents: req.budget_cents,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    let action = if status_changed {
        ActivityAction::StatusChanged
    } else {
        ActivityAction::Updated
    };

    commit_activity(
        &state,
        tx,
        new.account_id,
        NewActivity::changed(id, auth.user_id, action, EntityType::Project, id, &old, &new),
    )
    .await?;

    Ok(Json(new))
}

/// `DELETE /api/projects/:id`, archives the project
///
/// Archiving an already archived project is a no-op.
pub async fn archive_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    let project = Project::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    require_project_access(&state.db, &project, &auth, ResourcePermission::Manage).await?;

    let mut tx = state.db.begin().await?;

    let old = Project::find_for_update(&mut *tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    if !old.status.is_open() {
        return Ok(Json(old));
    }

    let archived = Project::archive(&mut *tx, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))?;

    commit_activity(
        &state,
        tx,
        archived.account_id,
        NewActivity::changed(
            id,
            auth.user_id,
            ActivityAction::StatusChanged,
            EntityType::Project,
            id,
            &old,
            &archived,
        ),
    )
    .await?;

    tracing::info!(project_id = %id, "Project archived");

    Ok(Json(archived))
}

/// `GET /api/projects/:id/activity`, newest first
pub async fn list_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<ActivityLog>>> {
    load_project(&state, id, &auth, ResourcePermission::Read).await?;

    let entries = ActivityLog::list_by_project(&state.db, id, page.limit(), page.offset()).await?;
    Ok(Json(entries))
}
