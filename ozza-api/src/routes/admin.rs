/// Admin console, reachable by admin and developer users only
///
/// The staff check runs as a route layer in `app.rs`; handlers here assume it.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{tally, Tally},
};
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use ozza_shared::{
    auth::middleware::AuthContext,
    models::{
        account::{Account, AccountKind},
        integration::Integration,
        invitation::{Invitation, InvitationStatus},
        project::Project,
        security_log::{export_csv, SecurityLog, SecurityLogFilter, EXPORT_LIMIT},
        usage::{UsageCounter, UsageTotals},
        user::{User, UserRole},
        webhook::Webhook,
    },
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PlatformStats {
    pub users: i64,
    pub users_by_role: Vec<Tally<UserRole>>,
    pub accounts_by_kind: Vec<Tally<AccountKind>>,
    pub invitations_by_status: Vec<Tally<InvitationStatus>>,
    pub projects: i64,
    pub active_webhooks: i64,
    pub active_integrations: i64,
    /// This month, all accounts
    pub usage: UsageTotals,
    /// Last 24 hours
    pub failed_logins: i64,
}

#[derive(Debug, Serialize)]
pub struct SecurityLogPage {
    pub logs: Vec<SecurityLog>,
    pub total: i64,
}

/// `GET /api/admin/stats`
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<PlatformStats>> {
    let db = &state.db;

    Ok(Json(PlatformStats {
        users: User::count(db).await?,
        users_by_role: tally(User::count_by_role(db).await?),
        accounts_by_kind: tally(Account::count_by_kind(db).await?),
        invitations_by_status: tally(Invitation::count_by_status(db).await?),
        projects: Project::count(db).await?,
        active_webhooks: Webhook::count(db).await?,
        active_integrations: Integration::count(db).await?,
        usage: UsageCounter::platform_totals(db).await?,
        failed_logins: SecurityLog::count_recent(db, "auth.login_failed").await?,
    }))
}

/// `GET /api/admin/security-logs?event_type=&user_id=&since=&until=&limit=&offset=`
pub async fn list_security_logs(
    State(state): State<AppState>,
    Query(filter): Query<SecurityLogFilter>,
) -> ApiResult<Json<SecurityLogPage>> {
    let logs = SecurityLog::list(&state.db, &filter).await?;
    let total = SecurityLog::count(&state.db, &filter).await?;

    Ok(Json(SecurityLogPage { logs, total }))
}

/// `GET /api/admin/security-logs/export`, same filters, CSV attachment
///
/// Pagination is ignored; the export holds the newest `EXPORT_LIMIT` rows.
pub async fn export_security_logs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(mut filter): Query<SecurityLogFilter>,
) -> ApiResult<Response> {
    filter.limit = Some(EXPORT_LIMIT);
    filter.offset = None;

    let logs = SecurityLog::list(&state.db, &filter).await?;
    let body = export_csv(&logs)
        .map_err(|e| ApiError::InternalError(format!("CSV export failed: {e}")))?;

    tracing::info!(
        user_id = %auth.user_id,
        rows = logs.len(),
        "Security log exported"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, attachment_header(Utc::now())),
        ],
        body,
    )
        .into_response())
}

fn attachment_header(now: chrono::DateTime<Utc>) -> String {
    format!(
        "attachment; filename=\"security-logs-{}.csv\"",
        now.format("%Y%m%d-%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_attachment_header() {
        let at = Utc.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(
            attachment_header(at),
            "attachment; filename=\"security-logs-20260305-140709.csv\""
        );
    }
}
