/// Dashboard endpoints
///
/// `GET /api/dashboard` returns one JSON summary whose sections depend on
/// the caller's role. `GET /api/dashboard/redirect` tells the frontend where
/// a freshly signed-in user lands.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{tally, Tally},
};
use axum::{extract::State, Extension, Json};
use ozza_shared::{
    auth::middleware::AuthContext,
    db::retry::{with_retry, RetryConfig},
    models::{
        account::{Account, AccountWithRole},
        activity_log::ActivityLog,
        deliverable::Deliverable,
        project::{Project, ProjectStatus},
        task::Task,
        user::{User, UserRole},
    },
};
use serde::Serialize;

const OPEN_TASK_LIMIT: i64 = 10;
const RECENT_ACTIVITY_LIMIT: i64 = 20;

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub role: UserRole,
    pub accounts: Vec<AccountWithRole>,
    pub projects: Vec<Tally<ProjectStatus>>,
    pub open_tasks: Vec<Task>,
    pub recent_activity: Vec<ActivityLog>,

    /// Coach and agency: direct child accounts across owned accounts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_accounts: Option<i64>,

    /// Client: submitted deliverables waiting on their sign-off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_review: Option<i64>,

    /// Admin and developer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformCounts>,
}

#[derive(Debug, Serialize)]
pub struct PlatformCounts {
    pub users: i64,
    pub projects: i64,
}

#[derive(Debug, Serialize)]
pub struct Redirect {
    pub role: UserRole,
    pub redirect_to: &'static str,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Dashboard>> {
    let accounts = Account::list_for_user(&state.db, auth.user_id).await?;
    let projects = Project::status_counts_for_user(&state.db, auth.user_id).await?;
    let open_tasks = Task::list_open_for_assignee(&state.db, auth.user_id, OPEN_TASK_LIMIT).await?;
    let recent_activity =
        ActivityLog::recent_for_user(&state.db, auth.user_id, RECENT_ACTIVITY_LIMIT).await?;

    let mut summary = Dashboard {
        role: auth.role,
        accounts,
        projects: tally(projects),
        open_tasks,
        recent_activity,
        child_accounts: None,
        awaiting_review: None,
        platform: None,
    };

    match auth.role {
        UserRole::Coach | UserRole::Agency => {
            let mut children = 0;
            for owned in summary.accounts.iter().filter(|a| a.account.owner_id == auth.user_id) {
                children += Account::list_children(&state.db, owned.account.id).await?.len() as i64;
            }
            summary.child_accounts = Some(children);
        }
        UserRole::Client => {
            summary.awaiting_review =
                Some(Deliverable::count_awaiting_review_for_user(&state.db, auth.user_id).await?);
        }
        UserRole::Admin | UserRole::Developer => {
            summary.platform = Some(PlatformCounts {
                users: User::count(&state.db).await?,
                projects: Project::count(&state.db).await?,
            });
        }
    }

    Ok(Json(summary))
}

/// Role lookup with backoff; a user deleted mid-session gets 401.
pub async fn redirect(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Redirect>> {
    let role = with_retry(RetryConfig::default(), "dashboard_redirect", || {
        User::find_role(&state.db, auth.user_id)
    })
    .await?
    .ok_or_else(|| ApiError::Unauthorized("User no longer exists".to_string()))?;

    Ok(Json(Redirect {
        role,
        redirect_to: role.landing_path(),
    }))
}
