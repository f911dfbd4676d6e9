/// Community link endpoints
///
/// A community link is a reusable, optionally capped referral code. Unlike
/// invitations it names no email; each signup through it consumes one use.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::auth::client_ip,
    routes::AccountQuery,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use ozza_shared::{
    auth::{
        authorization::{require_role, require_user_role},
        middleware::AuthContext,
    },
    models::{
        account::Account,
        community_link::CommunityLink,
        invitation::InvitationKind,
        membership::MemberRole,
        security_log::{NewSecurityLog, SecurityLog},
    },
    onboarding::{self, CommunityPreview, NewCommunityLink},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommunityLinkRequest {
    pub account_id: Uuid,

    /// Role granted on signup
    pub kind: InvitationKind,

    #[validate(range(min = 1, message = "max_uses must be positive"))]
    pub max_uses: Option<i32>,

    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CommunityLinkView {
    #[serde(flatten)]
    pub link: CommunityLink,

    pub url: String,

    pub remaining_uses: Option<i32>,

    pub redeemable: bool,
}

impl CommunityLinkView {
    fn new(link: CommunityLink, app_base_url: &str) -> Self {
        Self {
            url: onboarding::community_url(app_base_url, &link.code),
            remaining_uses: link.remaining_uses(),
            redeemable: link.is_redeemable_at(Utc::now()),
            link,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub code: String,
}

/// `POST /api/community-links`
///
/// Same chain rules as invitations: coaches publish agency links from their
/// coach account, agencies publish client links from their agency account.
pub async fn create_community_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<CreateCommunityLinkRequest>,
) -> ApiResult<(StatusCode, Json<CommunityLinkView>)> {
    req.validate()?;
    require_user_role(&auth, &[req.kind.inviter_role()])?;

    if matches!(req.expires_at, Some(at) if at <= Utc::now()) {
        return Err(ApiError::invalid_field("expires_at", "Expiry must be in the future"));
    }

    let account = Account::find_by_id(&state.db, req.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

    if account.kind != req.kind.inviting_account_kind() {
        return Err(ApiError::BadRequest(format!(
            "{} links must come from a {} account",
            req.kind,
            req.kind.inviting_account_kind()
        )));
    }

    require_role(&state.db, account.id, auth.user_id, MemberRole::Admin).await?;

    let mut tx = state.db.begin().await?;

    let link = onboarding::create_community_link(
        &mut *tx,
        NewCommunityLink {
            account_id: account.id,
            created_by: auth.user_id,
            kind: req.kind,
            max_uses: req.max_uses,
            expires_at: req.expires_at,
        },
    )
    .await?;

    SecurityLog::record(
        &mut *tx,
        NewSecurityLog::new("community_link.created")
            .user(auth.user_id, auth.email.clone())
            .ip(client_ip(&headers))
            .details(json!({ "link_id": link.id, "kind": link.kind, "account_id": account.id })),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(link_id = %link.id, account_id = %account.id, "Community link created");

    Ok((
        StatusCode::CREATED,
        Json(CommunityLinkView::new(link, &state.config.api.app_base_url)),
    ))
}

/// `GET /api/community-links?account_id=`
pub async fn list_community_links(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<CommunityLinkView>>> {
    require_role(&state.db, query.account_id, auth.user_id, MemberRole::Admin).await?;

    let links = CommunityLink::list_by_account(&state.db, query.account_id).await?;
    let base = &state.config.api.app_base_url;

    Ok(Json(
        links
            .into_iter()
            .map(|link| CommunityLinkView::new(link, base))
            .collect(),
    ))
}

/// `POST /api/community-links/:id/deactivate`
pub async fn deactivate_community_link(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CommunityLinkView>> {
    let link = CommunityLink::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Community link not found".to_string()))?;

    require_role(&state.db, link.account_id, auth.user_id, MemberRole::Admin).await?;

    let link = CommunityLink::deactivate(&state.db, id, link.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Community link not found".to_string()))?;

    tracing::info!(link_id = %id, "Community link deactivated");

    Ok(Json(CommunityLinkView::new(link, &state.config.api.app_base_url)))
}

/// `GET /api/community-links/preview?code=`, public
pub async fn preview_community_link(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<CommunityPreview>> {
    let mut conn = state.db.acquire().await?;
    let preview = onboarding::preview_community_link(&mut *conn, &query.code).await?;

    Ok(Json(preview))
}
