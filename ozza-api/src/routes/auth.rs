/// Authentication endpoints
///
/// - `POST /api/auth/signup` - create a user (root coach, invite or community link)
/// - `POST /api/auth/login` - email + password
/// - `POST /api/auth/logout` - clear session cookies
/// - `POST /api/auth/refresh` - new session from the refresh token
/// - `GET /api/auth/me` - current user and memberships
/// - `PATCH /api/auth/me` - update profile or password
///
/// Successful signup, login and refresh set two HttpOnly cookies:
/// `ozza_session` (7 days) and `ozza_refresh` (30 days, scoped to
/// `/api/auth`). Tokens are also returned in the body for API clients that
/// send `Authorization: Bearer`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    middleware::auth::client_ip,
    routes::double_option,
};
use axum::{extract::State, http::HeaderMap, http::StatusCode, Extension, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use ozza_shared::{
    auth::{
        jwt::{self, IssuedTokens},
        middleware::{AuthContext, REFRESH_COOKIE, SESSION_COOKIE},
        password,
    },
    models::{
        account::{Account, AccountWithRole},
        security_log::{NewSecurityLog, SecurityLog},
        user::{UpdateUser, User, UserSummary},
    },
    onboarding::{self, NewSignup, Onboarding},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

const REFRESH_COOKIE_PATH: &str = "/api/auth";

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    /// Plaintext token from `/signup?invite=`
    pub invite_token: Option<String>,

    /// Code from `/signup?ref=`
    pub community_code: Option<String>,
}

impl SignupRequest {
    fn onboarding(&self) -> ApiResult<Onboarding> {
        let token = self.invite_token.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let code = self.community_code.as_deref().map(str::trim).filter(|c| !c.is_empty());

        match (token, code) {
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "Use either an invitation or a community link, not both".to_string(),
            )),
            (Some(token), None) => Ok(Onboarding::Invite(token.to_string())),
            (None, Some(code)) => Ok(Onboarding::Community(code.to_string())),
            (None, None) => Ok(Onboarding::Root),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMeRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub name: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    pub avatar_url: Option<Option<String>>,

    pub current_password: Option<String>,

    pub new_password: Option<String>,
}

/// Body of signup, login and refresh
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserSummary,

    /// Landing path for the user's role
    pub redirect_to: &'static str,

    pub session_token: String,

    pub refresh_token: String,

    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    #[serde(flatten)]
    pub session: SessionResponse,

    pub account: Account,

    pub parent_account_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,

    pub accounts: Vec<AccountWithRole>,
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(state.config.api.production)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(
            jwt::TokenType::Session.default_expiration().num_seconds(),
        ))
        .build()
}

fn refresh_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(state.config.api.production)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(
            jwt::TokenType::Refresh.default_expiration().num_seconds(),
        ))
        .build()
}

pub(crate) fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
) -> ApiResult<(CookieJar, SessionResponse)> {
    let IssuedTokens {
        session,
        session_claims,
        refresh,
    } = jwt::issue_tokens(user.id, user.role, state.jwt_secret())?;

    let jar = jar
        .add(session_cookie(state, session.clone()))
        .add(refresh_cookie(state, refresh.clone()));

    Ok((
        jar,
        SessionResponse {
            user: user.summary(),
            redirect_to: user.role.landing_path(),
            session_token: session,
            refresh_token: refresh,
            expires_at: session_claims.exp,
        },
    ))
}

/// Register a user
///
/// ```text
/// POST /api/auth/signup
///
/// { "email": "kim@example.com", "password": "s3cretpass", "name": "Kim",
///   "invite_token": "inv_..." }
/// ```
///
/// Without a token or code the user becomes a coach with a new root account.
/// With `invite_token` the invitation is resolved; with `community_code` the
/// link is redeemed. User creation and attachment share one transaction, so
/// a rejected invitation leaves no user behind.
///
/// # Errors
///
/// - `400`: both token and code, malformed token, email mismatch
/// - `404`: unknown invitation
/// - `409`: email taken, invitation already used
/// - `410`: invitation expired or revoked, community link unavailable
/// - `422`: validation failed
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<SignupResponse>)> {
    req.validate()?;
    password::validate_password_strength(&req.password)
        .map_err(|e| ApiError::invalid_field("password", e))?;

    let onboarding = req.onboarding()?;
    let password_hash = password::hash_password_blocking(req.password).await?;

    let mut tx = state.db.begin().await?;
    let outcome = onboarding::signup(
        &mut *tx,
        NewSignup {
            email: req.email,
            password_hash,
            name: req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            onboarding,
            ip_address: client_ip(&headers),
        },
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %outcome.user.id,
        role = %outcome.user.role,
        account_id = %outcome.attachment.account.id,
        "User signed up"
    );

    let (jar, session) = start_session(&state, jar, &outcome.user)?;

    Ok((
        StatusCode::CREATED,
        jar,
        Json(SignupResponse {
            session,
            account: outcome.attachment.account,
            parent_account_id: outcome.attachment.parent_account_id,
        }),
    ))
}

/// Log in with email and password
///
/// Failures answer the same 401 whether the email is unknown or the
/// password is wrong, and are written to the security log.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    req.validate()?;
    let ip = client_ip(&headers);

    let user = User::find_by_email(&state.db, &req.email).await?;

    let verified = match &user {
        Some(user) => password::verify_password_blocking(req.password, user.password_hash.clone()).await?,
        None => false,
    };

    let user = match user {
        Some(user) if verified => user,
        _ => {
            SecurityLog::record(
                &state.db,
                NewSecurityLog::new("auth.login_failed")
                    .email(req.email.trim().to_lowercase())
                    .ip(ip),
            )
            .await?;
            tracing::info!("Failed login attempt");
            return Err(ApiError::Unauthorized("Invalid email or password".to_string()));
        }
    };

    User::update_last_login(&state.db, user.id).await?;
    SecurityLog::record(
        &state.db,
        NewSecurityLog::new("auth.login").user(user.id, user.email.clone()).ip(ip),
    )
    .await?;

    let (jar, session) = start_session(&state, jar, &user)?;
    Ok((jar, Json(session)))
}

/// Clear the session cookies
pub async fn logout(jar: CookieJar) -> (StatusCode, CookieJar) {
    let jar = jar
        .remove(Cookie::build(SESSION_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path(REFRESH_COOKIE_PATH));

    (StatusCode::NO_CONTENT, jar)
}

/// Exchange a refresh token for a fresh session
///
/// The token comes from the `ozza_refresh` cookie or `{"refresh_token": ...}`.
/// The user is re-read so the new session carries the current role.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token))
        .ok_or_else(|| ApiError::Unauthorized("Missing refresh token".to_string()))?;

    let claims = jwt::validate_refresh_token(&token, state.jwt_secret())?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Session no longer valid".to_string()))?;

    let (jar, session) = start_session(&state, jar, &user)?;
    Ok((jar, Json(session)))
}

/// Current user with every account they belong to
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<MeResponse>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let accounts = Account::list_for_user(&state.db, auth.user_id).await?;

    Ok(Json(MeResponse { user, accounts }))
}

/// Update profile fields; changing the password requires the current one.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<UpdateMeRequest>,
) -> ApiResult<Json<User>> {
    req.validate()?;

    if let Some(Some(name)) = &req.name {
        if name.chars().count() > 100 {
            return Err(ApiError::invalid_field("name", "Name must be at most 100 characters"));
        }
    }
    if let Some(Some(url)) = &req.avatar_url {
        if reqwest::Url::parse(url).is_err() {
            return Err(ApiError::invalid_field("avatar_url", "Invalid URL"));
        }
    }

    let password_hash = match req.new_password {
        Some(new_password) => {
            password::validate_password_strength(&new_password)
                .map_err(|e| ApiError::invalid_field("new_password", e))?;

            let current = req
                .current_password
                .ok_or_else(|| ApiError::invalid_field("current_password", "Current password is required"))?;

            let user = User::find_by_id(&state.db, auth.user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

            if !password::verify_password_blocking(current, user.password_hash).await? {
                return Err(ApiError::Forbidden("Current password is incorrect".to_string()));
            }

            Some(password::hash_password_blocking(new_password).await?)
        }
        None => None,
    };

    let password_changed = password_hash.is_some();

    let user = User::update(
        &state.db,
        auth.user_id,
        UpdateUser {
            name: req.name,
            avatar_url: req.avatar_url,
            password_hash,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if password_changed {
        SecurityLog::record(
            &state.db,
            NewSecurityLog::new("auth.password_changed")
                .user(user.id, user.email.clone())
                .ip(client_ip(&headers))
                .details(json!({ "via": "profile" })),
        )
        .await?;
    }

    Ok(Json(user))
}
