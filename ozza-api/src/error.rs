/// Error handling for the API server
///
/// Handlers return `Result<T, ApiError>`; the error converts into a status
/// code and a JSON body:
///
/// ```json
/// { "error": "not_found", "message": "Project not found" }
/// ```
///
/// Validation failures add `details`, a list of `{field, message}`.
/// Domain errors from `ozza_shared` convert with `?` through the `From`
/// impls below.
///
/// # Example
///
/// ```
/// use ozza_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::{json, Value};
///
/// async fn handler(found: bool) -> ApiResult<Json<Value>> {
///     if !found {
///         return Err(ApiError::NotFound("Project not found".to_string()));
///     }
///     Ok(Json(json!({ "ok": true })))
/// }
/// ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Months, NaiveTime, Utc};
use ozza_shared::{
    auth::{authorization::AuthzError, jwt::JwtError, middleware::AuthError, password::PasswordError},
    models::usage::period_start,
    onboarding::InvitationError,
    payments::PaymentsError,
    quota::{QuotaError, QuotaType},
    webhooks::WebhookError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),

    /// 401
    Unauthorized(String),

    /// 403
    Forbidden(String),

    /// 404
    NotFound(String),

    /// 409, e.g. duplicate email or an invitation already used
    Conflict(String),

    /// 410, expired or revoked invitations
    Gone(String),

    /// 422
    ValidationError(Vec<ValidationErrorDetail>),

    /// 429 with `Retry-After`
    RateLimitExceeded { retry_after: u64, message: String },

    /// 500, message is logged and never returned
    InternalError(String),

    /// 503
    ServiceUnavailable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    pub field: String,

    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail::new(field, message)])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Gone(_) => "gone",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Gone(msg) => write!(f, "Gone: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::RateLimitExceeded { message, .. } => write!(f, "Rate limit exceeded: {}", message),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = self.code().to_string();

        let retry_after = match &self {
            ApiError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        let (message, details) = match self {
            ApiError::ValidationError(errors) => ("Request validation failed".to_string(), Some(errors)),
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ("An internal error occurred".to_string(), None)
            }
            ApiError::RateLimitExceeded { message, .. } => (message, None),
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::ServiceUnavailable(msg) => (msg, None),
        };

        let mut response = (status, Json(ErrorResponse { error, message, details })).into_response();

        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                match db_err.code().as_deref() {
                    // check_violation
                    Some("23514") => {
                        return ApiError::BadRequest(format!(
                            "Value rejected by constraint {}",
                            db_err.constraint().unwrap_or("check")
                        ))
                    }
                    // foreign_key_violation
                    Some("23503") => {
                        return ApiError::BadRequest("Referenced resource does not exist".to_string())
                    }
                    _ => {}
                }

                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("email") {
                        return ApiError::Conflict("Email already exists".to_string());
                    }
                    return ApiError::Conflict(format!("Constraint violation: {}", constraint));
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            sqlx::Error::PoolTimedOut => {
                ApiError::ServiceUnavailable("Database is busy, try again shortly".to_string())
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => ApiError::Unauthorized("Missing credentials".to_string()),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
            AuthError::UnknownUser => ApiError::Unauthorized("Session no longer valid".to_string()),
            AuthError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::NotMember(_) => ApiError::Forbidden("Not a member of this account".to_string()),
            AuthzError::InsufficientRole { required, .. } => {
                ApiError::Forbidden(format!("Requires the {} role", required))
            }
            AuthzError::RoleNotAllowed { actual } => {
                ApiError::Forbidden(format!("Not available to {} users", actual))
            }
            AuthzError::NotAuthorized => {
                ApiError::Forbidden("Not authorized to access this resource".to_string())
            }
            AuthzError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::InvalidIssuer => ApiError::Unauthorized("Invalid token issuer".to_string()),
            JwtError::CreateError(msg) => ApiError::InternalError(format!("Token creation failed: {}", msg)),
            other => ApiError::Unauthorized(format!("Invalid token: {}", other)),
        }
    }
}

impl From<InvitationError> for ApiError {
    fn from(err: InvitationError) -> Self {
        match err {
            InvitationError::NotFound => ApiError::NotFound(err.to_string()),
            InvitationError::AlreadyUsed => ApiError::Conflict(err.to_string()),
            InvitationError::Revoked | InvitationError::Expired | InvitationError::LinkUnavailable => {
                ApiError::Gone(err.to_string())
            }
            InvitationError::EmailMismatch | InvitationError::InvalidToken => {
                ApiError::BadRequest(err.to_string())
            }
            InvitationError::Database(e) => e.into(),
        }
    }
}

/// Seconds until the monthly download counter resets
fn seconds_until_next_period() -> u64 {
    let now = Utc::now();
    period_start(now.date_naive())
        .checked_add_months(Months::new(1))
        .map(|next| (next.and_time(NaiveTime::MIN).and_utc() - now).num_seconds().max(0) as u64)
        .unwrap_or(0)
}

impl From<QuotaError> for ApiError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::LimitExceeded {
                quota_type: QuotaType::Downloads,
                ..
            } => ApiError::RateLimitExceeded {
                retry_after: seconds_until_next_period(),
                message: err.to_string(),
            },
            QuotaError::LimitExceeded { .. } => ApiError::Forbidden(err.to_string()),
            QuotaError::AccountNotFound(_) => ApiError::NotFound("Account not found".to_string()),
            QuotaError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<PaymentsError> for ApiError {
    fn from(err: PaymentsError) -> Self {
        match err {
            PaymentsError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            PaymentsError::PlanNotPurchasable(_) => ApiError::BadRequest(err.to_string()),
            PaymentsError::InvalidSignature(_) | PaymentsError::Parse(_) => ApiError::BadRequest(err.to_string()),
            PaymentsError::Api(_) | PaymentsError::Network(_) => {
                tracing::warn!(error = %err, "Payments provider call failed");
                ApiError::ServiceUnavailable("Payments provider unavailable".to_string())
            }
            PaymentsError::Database(e) => e.into(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidUrl(_) => ApiError::invalid_field("url", err.to_string()),
            WebhookError::Database(e) => e.into(),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        ApiError::ValidationError(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::Gone("Invitation has expired".to_string());
        assert_eq!(err.to_string(), "Gone: Invitation has expired");
    }

    #[test]
    fn test_validation_error() {
        let err = ApiError::ValidationError(vec![
            ValidationErrorDetail::new("email", "Invalid email format"),
            ValidationErrorDetail::new("password", "Password too short"),
        ]);
        assert_eq!(err.to_string(), "Validation failed: 2 errors");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_invitation_error_mapping() {
        let cases = [
            (InvitationError::NotFound, StatusCode::NOT_FOUND),
            (InvitationError::AlreadyUsed, StatusCode::CONFLICT),
            (InvitationError::Revoked, StatusCode::GONE),
            (InvitationError::Expired, StatusCode::GONE),
            (InvitationError::EmailMismatch, StatusCode::BAD_REQUEST),
            (InvitationError::InvalidToken, StatusCode::BAD_REQUEST),
            (InvitationError::LinkUnavailable, StatusCode::GONE),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_quota_error_mapping() {
        let downloads = ApiError::from(QuotaError::LimitExceeded {
            quota_type: QuotaType::Downloads,
            limit: 50,
            current: 50,
        });
        assert_eq!(downloads.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(matches!(downloads, ApiError::RateLimitExceeded { retry_after, .. } if retry_after > 0));

        let integrations = ApiError::from(QuotaError::LimitExceeded {
            quota_type: QuotaType::Integrations,
            limit: 1,
            current: 1,
        });
        assert_eq!(integrations.status_code(), StatusCode::FORBIDDEN);
        assert!(integrations.to_string().contains("upgrade your plan"));
    }

    #[test]
    fn test_authz_error_mapping() {
        use ozza_shared::models::user::UserRole;

        let err = ApiError::from(AuthzError::RoleNotAllowed {
            actual: UserRole::Client,
        });
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "Forbidden: Not available to client users");
    }

    #[test]
    fn test_payments_not_configured_is_503() {
        assert_eq!(
            ApiError::from(PaymentsError::NotConfigured).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(PaymentsError::InvalidSignature("signature mismatch")).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_rate_limit_response_has_retry_after() {
        let response = ApiError::RateLimitExceeded {
            retry_after: 120,
            message: "Monthly downloads limit reached".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "120");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate_limit_exceeded");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn test_internal_error_hides_message() {
        let response = ApiError::InternalError("connection reset by peer".to_string()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["error"], "internal_error");
        assert_eq!(json["message"], "An internal error occurred");
    }
}
