/// Account endpoints: tenants, branding, members and child accounts
///
/// Reads need a membership (staff may read any account). Branding, member
/// removal and the child list need admin or owner.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::auth::client_ip,
    routes::double_option,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use ozza_shared::{
    auth::{
        authorization::{require_membership, require_role, AuthzError},
        middleware::AuthContext,
    },
    models::{
        account::{Account, AccountWithRole, UpdateBranding},
        membership::{AccountMember, MemberRole, MemberWithUser},
        security_log::{NewSecurityLog, SecurityLog},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct AccountDetail {
    #[serde(flatten)]
    pub account: Account,

    /// `None` for staff viewing an account they do not belong to
    pub member_role: Option<MemberRole>,

    pub member_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBrandingRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1 to 100 characters"))]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub primary_color: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub secondary_color: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub logo_url: Option<Option<String>>,
}

/// `#rgb` or `#rrggbb`
fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

impl UpdateBrandingRequest {
    fn into_update(self) -> ApiResult<UpdateBranding> {
        self.validate()?;

        for (field, value) in [
            ("primary_color", &self.primary_color),
            ("secondary_color", &self.secondary_color),
        ] {
            if let Some(Some(color)) = value {
                if !is_hex_color(color) {
                    return Err(ApiError::invalid_field(field, "Expected a hex color like #1a2b3c"));
                }
            }
        }

        if let Some(Some(url)) = &self.logo_url {
            match reqwest::Url::parse(url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => return Err(ApiError::invalid_field("logo_url", "Expected an http(s) URL")),
            }
        }

        let update = UpdateBranding {
            name: self.name.map(|n| n.trim().to_string()),
            primary_color: self.primary_color,
            secondary_color: self.secondary_color,
            logo_url: self.logo_url,
        };

        if update.is_empty() {
            return Err(ApiError::BadRequest("Nothing to update".to_string()));
        }

        Ok(update)
    }
}

/// Membership role for reads; staff pass without one.
async fn read_access(
    state: &AppState,
    account_id: Uuid,
    auth: &AuthContext,
) -> ApiResult<Option<MemberRole>> {
    match require_membership(&state.db, account_id, auth.user_id).await {
        Ok(role) => Ok(Some(role)),
        Err(AuthzError::NotMember(_)) if auth.is_staff() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `GET /api/accounts`
pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<AccountWithRole>>> {
    let accounts = Account::list_for_user(&state.db, auth.user_id).await?;
    Ok(Json(accounts))
}

/// `GET /api/accounts/:id`
pub async fn get_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AccountDetail>> {
    let member_role = read_access(&state, id, &auth).await?;

    let account = Account::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

    let member_count = AccountMember::count_for_account(&state.db, id).await?;

    Ok(Json(AccountDetail {
        account,
        member_role,
        member_count,
    }))
}

/// `PATCH /api/accounts/:id/branding`
pub async fn update_branding(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateBrandingRequest>,
) -> ApiResult<Json<Account>> {
    require_role(&state.db, id, auth.user_id, MemberRole::Admin).await?;

    let update = req.into_update()?;

    let account = Account::update_branding(&state.db, id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

    tracing::info!(account_id = %id, "Account branding updated");

    Ok(Json(account))
}

/// `GET /api/accounts/:id/members`
pub async fn list_members(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<MemberWithUser>>> {
    read_access(&state, id, &auth).await?;

    let members = AccountMember::list_members(&state.db, id).await?;
    Ok(Json(members))
}

/// `DELETE /api/accounts/:id/members/:user_id`
///
/// Admins remove others; any member may remove themselves. The owner
/// membership cannot be removed.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let role = require_membership(&state.db, id, auth.user_id).await?;

    if user_id != auth.user_id && !role.can_manage_members() {
        return Err(AuthzError::InsufficientRole {
            required: MemberRole::Admin,
            actual: role,
        }
        .into());
    }

    let target = AccountMember::find(&state.db, id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;

    if target.role == MemberRole::Owner {
        return Err(ApiError::Conflict("The account owner cannot be removed".to_string()));
    }

    if !AccountMember::remove(&state.db, id, user_id).await? {
        return Err(ApiError::NotFound("Member not found".to_string()));
    }

    SecurityLog::record(
        &state.db,
        NewSecurityLog::new("account.member_removed")
            .user(auth.user_id, auth.email.clone())
            .ip(client_ip(&headers))
            .details(json!({ "account_id": id, "removed_user_id": user_id, "role": target.role })),
    )
    .await?;

    tracing::info!(account_id = %id, removed_user_id = %user_id, "Member removed");

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/accounts/:id/children`
pub async fn list_children(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Account>>> {
    if !auth.is_staff() {
        require_role(&state.db, id, auth.user_id, MemberRole::Admin).await?;
    }

    let children = Account::list_children(&state.db, id).await?;
    Ok(Json(children))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_hex_color() {
        assert!(is_hex_color("#fff"));
        assert!(is_hex_color("#1A2b3C"));
        assert!(!is_hex_color("1a2b3c"));
        assert!(!is_hex_color("#12345"));
        assert!(!is_hex_color("#ggg"));
    }

    #[test]
    fn test_branding_request_checks_fields() {
        let req: UpdateBrandingRequest =
            serde_json::from_value(json!({ "primary_color": "red" })).unwrap();
        assert!(matches!(req.into_update(), Err(ApiError::ValidationError(_))));

        let req: UpdateBrandingRequest =
            serde_json::from_value(json!({ "logo_url": "javascript:alert(1)" })).unwrap();
        assert!(matches!(req.into_update(), Err(ApiError::ValidationError(_))));

        let req: UpdateBrandingRequest = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(req.into_update(), Err(ApiError::BadRequest(_))));

        let req: UpdateBrandingRequest =
            serde_json::from_value(json!({ "logo_url": null, "primary_color": "#0a0" })).unwrap();
        let update = req.into_update().unwrap();
        assert_eq!(update.logo_url, Some(None));
        assert_eq!(update.primary_color, Some(Some("#0a0".to_string())));
    }
}
