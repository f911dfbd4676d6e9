/// Invitation endpoints
///
/// Coaches invite agencies, agencies invite clients. The plaintext token is
/// returned once, inside the invite URL; only its hash is stored.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::auth::client_ip,
    routes::{auth::start_session, auth::SessionResponse, AccountQuery, Pagination},
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use axum_extra::extract::cookie::CookieJar;
use ozza_shared::{
    auth::{
        authorization::{require_role, require_user_role},
        middleware::AuthContext,
    },
    models::{
        account::Account,
        invitation::{Invitation, InvitationKind, InvitationStatus},
        membership::MemberRole,
        security_log::{NewSecurityLog, SecurityLog},
        user::User,
    },
    onboarding::{self, Attachment, IssueInvitation, InvitationPreview},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvitationRequest {
    /// The inviting account
    pub account_id: Uuid,

    /// Restricts acceptance to this address
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateInvitationResponse {
    pub invitation: Invitation,

    /// `{APP_BASE_URL}/signup?invite={token}`, shown once
    pub invite_url: String,
}

/// An invitation with the status resolution would report right now
#[derive(Debug, Serialize)]
pub struct InvitationView {
    #[serde(flatten)]
    pub invitation: Invitation,

    pub effective_status: InvitationStatus,
}

impl From<Invitation> for InvitationView {
    fn from(invitation: Invitation) -> Self {
        Self {
            effective_status: invitation.effective_status(),
            invitation,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptInvitationResponse {
    pub attachment: Attachment,

    /// Fresh tokens carrying the role the invitation assigned
    #[serde(flatten)]
    pub session: SessionResponse,
}

/// `POST /api/invitations/agency`, coaches only
pub async fn create_agency_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<CreateInvitationRequest>,
) -> ApiResult<(StatusCode, Json<CreateInvitationResponse>)> {
    create_invitation(state, auth, headers, InvitationKind::Agency, req).await
}

/// `POST /api/invitations/client`, agencies only
pub async fn create_client_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<CreateInvitationRequest>,
) -> ApiResult<(StatusCode, Json<CreateInvitationResponse>)> {
    create_invitation(state, auth, headers, InvitationKind::Client, req).await
}

async fn create_invitation(
    state: AppState,
    auth: AuthContext,
    headers: HeaderMap,
    kind: InvitationKind,
    req: CreateInvitationRequest,
) -> ApiResult<(StatusCode, Json<CreateInvitationResponse>)> {
    req.validate()?;
    require_user_role(&auth, &[kind.inviter_role()])?;

    let account = Account::find_by_id(&state.db, req.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

    if account.kind != kind.inviting_account_kind() {
        return Err(ApiError::BadRequest(format!(
            "{} invitations must come from a {} account",
            kind,
            kind.inviting_account_kind()
        )));
    }

    require_role(&state.db, account.id, auth.user_id, MemberRole::Admin).await?;

    let mut tx = state.db.begin().await?;

    let issued = onboarding::issue_invitation(
        &mut *tx,
        IssueInvitation {
            kind,
            account_id: account.id,
            invited_by: auth.user_id,
            email: req.email.map(|e| e.trim().to_lowercase()),
            name: req.name,
            ttl: state.config.invitations.ttl(),
        },
    )
    .await?;

    SecurityLog::record(
        &mut *tx,
        NewSecurityLog::new("invitation.created")
            .user(auth.user_id, auth.email.clone())
            .ip(client_ip(&headers))
            .details(json!({
                "invitation_id": issued.invitation.id,
                "kind": kind,
                "account_id": account.id,
            })),
    )
    .await?;

    tx.commit().await?;

    let invite_url = issued.url(&state.config.api.app_base_url);

    Ok((
        StatusCode::CREATED,
        Json(CreateInvitationResponse {
            invitation: issued.invitation,
            invite_url,
        }),
    ))
}

/// `GET /api/invitations?account_id=`, newest first
pub async fn list_invitations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(account): Query<AccountQuery>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<Vec<InvitationView>>> {
    require_role(&state.db, account.account_id, auth.user_id, MemberRole::Admin).await?;

    let invitations =
        Invitation::list_by_account(&state.db, account.account_id, page.limit(), page.offset())
            .await?;

    Ok(Json(invitations.into_iter().map(InvitationView::from).collect()))
}

/// `POST /api/invitations/:id/revoke`
///
/// Only pending invitations can be revoked; anything else is a 409.
pub async fn revoke_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<InvitationView>> {
    let invitation = Invitation::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))?;

    require_role(&state.db, invitation.account_id, auth.user_id, MemberRole::Admin).await?;

    let revoked = Invitation::revoke(&state.db, id, invitation.account_id)
        .await?
        .ok_or_else(|| ApiError::Conflict("Invitation is no longer pending".to_string()))?;

    SecurityLog::record(
        &state.db,
        NewSecurityLog::new("invitation.revoked")
            .user(auth.user_id, auth.email.clone())
            .ip(client_ip(&headers))
            .details(json!({ "invitation_id": id, "account_id": revoked.account_id })),
    )
    .await?;

    tracing::info!(invitation_id = %id, "Invitation revoked");

    Ok(Json(revoked.into()))
}

/// `GET /api/invitations/preview?token=`, public
pub async fn preview_invitation(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<InvitationPreview>> {
    let mut conn = state.db.acquire().await?;
    let preview = onboarding::preview_invitation(&mut *conn, query.token.trim()).await?;

    Ok(Json(preview))
}

/// `POST /api/invitations/accept`
///
/// For a user who already has an account. The invitation is resolved in
/// one transaction and a new session is issued, since the role may change.
pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<AcceptInvitationRequest>,
) -> ApiResult<(CookieJar, Json<AcceptInvitationResponse>)> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Session no longer valid".to_string()))?;

    let mut tx = state.db.begin().await?;
    let attachment =
        onboarding::resolve_invitation(&mut *tx, req.token.trim(), &user, client_ip(&headers))
            .await?;
    tx.commit().await?;

    let user = User {
        role: attachment.role,
        ..user
    };
    let (jar, session) = start_session(&state, jar, &user)?;

    Ok((jar, Json(AcceptInvitationResponse { attachment, session })))
}

