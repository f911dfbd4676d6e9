/// Session tokens (HS256 JWT)
///
/// A session token carries the user id (`sub`) and the user's platform role
/// (`role`). It travels in the `ozza_session` HttpOnly cookie or an
/// `Authorization: Bearer` header. The role claim is a hint for clients;
/// the auth middleware re-reads the user row on each request, so a role
/// changed by invite resolution applies immediately.
///
/// | type    | lifetime | used for                          |
/// |---------|----------|-----------------------------------|
/// | session | 7 days   | authenticating API calls          |
/// | refresh | 30 days  | minting a new session token       |
///
/// ```
/// use ozza_shared::auth::jwt::{create_token, validate_session_token, Claims, TokenType};
/// use ozza_shared::models::user::UserRole;
/// use uuid::Uuid;
///
/// let secret = "an-hs256-secret-that-is-32-bytes-long";
/// let user_id = Uuid::new_v4();
/// let token = create_token(&Claims::new(user_id, UserRole::Coach, TokenType::Session), secret).unwrap();
///
/// let claims = validate_session_token(&token, secret).unwrap();
/// assert_eq!(claims.sub, user_id);
/// assert_eq!(claims.role, UserRole::Coach);
/// ```

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::UserRole;

/// `iss` claim on every token Ozza mints
pub const ISSUER: &str = "ozza";

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to create token: {0}")]
    CreateError(String),

    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    #[error("Token has expired")]
    Expired,

    #[error("Invalid issuer")]
    InvalidIssuer,

    #[error("Expected a {expected} token")]
    WrongType { expected: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Session,
    Refresh,
}

impl TokenType {
    pub fn default_expiration(&self) -> Duration {
        match self {
            TokenType::Session => Duration::days(7),
            TokenType::Refresh => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Session => "session",
            TokenType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,

    /// Always [`ISSUER`]
    pub iss: String,

    pub iat: i64,

    pub exp: i64,

    pub nbf: i64,

    /// Platform role at the time of issue
    pub role: UserRole,

    pub token_type: TokenType,
}

impl Claims {
    pub fn new(user_id: Uuid, role: UserRole, token_type: TokenType) -> Self {
        Self::with_expiration(user_id, role, token_type, token_type.default_expiration())
    }

    pub fn with_expiration(
        user_id: Uuid,
        role: UserRole,
        token_type: TokenType,
        expires_in: Duration,
    ) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id,
            iss: ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            nbf: now.timestamp(),
            role,
            token_type,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }

    /// Seconds until `exp`, used for the cookie `Max-Age`
    pub fn seconds_remaining(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

pub fn create_token(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::CreateError(e.to_string()))
}

/// Checks signature, `exp`, `nbf` and `iss`.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = true;
    validation.validate_nbf = true;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
            _ => JwtError::ValidationError(e.to_string()),
        })
}

fn validate_typed(token: &str, secret: &str, expected: TokenType) -> Result<Claims, JwtError> {
    let claims = validate_token(token, secret)?;
    if claims.token_type != expected {
        return Err(JwtError::WrongType {
            expected: expected.as_str(),
        });
    }
    Ok(claims)
}

pub fn validate_session_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    validate_typed(token, secret, TokenType::Session)
}

pub fn validate_refresh_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    validate_typed(token, secret, TokenType::Refresh)
}

/// Session + refresh pair for a user
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub session: String,
    pub session_claims: Claims,
    pub refresh: String,
}

pub fn issue_tokens(user_id: Uuid, role: UserRole, secret: &str) -> Result<IssuedTokens, JwtError> {
    let session_claims = Claims::new(user_id, role, TokenType::Session);
    let session = create_token(&session_claims, secret)?;
    let refresh = create_token(&Claims::new(user_id, role, TokenType::Refresh), secret)?;

    Ok(IssuedTokens {
        session,
        session_claims,
        refresh,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    #[test]
    fn test_token_type_expiration() {
        assert_eq!(TokenType::Session.default_expiration(), Duration::days(7));
        assert_eq!(TokenType::Refresh.default_expiration(), Duration::days(30));
    }

    #[test]
    fn test_create_and_validate_session_token() {
        let user_id = Uuid::new_v4();
        let claims = Claims::new(user_id, UserRole::Agency, TokenType::Session);
        let token = create_token(&claims, SECRET).expect("create");

        let validated = validate_session_token(&token, SECRET).expect("validate");
        assert_eq!(validated.sub, user_id);
        assert_eq!(validated.role, UserRole::Agency);
        assert_eq!(validated.iss, ISSUER);
        assert!(validated.seconds_remaining() > 0);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let claims = Claims::new(Uuid::new_v4(), UserRole::Coach, TokenType::Session);
        let token = create_token(&claims, SECRET).unwrap();
        assert!(validate_token(&token, "another-secret-that-is-long-enough!!").is_err());
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims::with_expiration(
            Uuid::new_v4(),
            UserRole::Client,
            TokenType::Session,
            Duration::seconds(-3600),
        );
        assert!(claims.is_expired());
        assert_eq!(claims.seconds_remaining(), 0);

        let token = create_token(&claims, SECRET).unwrap();
        assert!(matches!(validate_token(&token, SECRET), Err(JwtError::Expired)));
    }

    #[test]
    fn test_token_types_are_not_interchangeable() {
        let tokens = issue_tokens(Uuid::new_v4(), UserRole::Coach, SECRET).unwrap();

        assert!(validate_session_token(&tokens.session, SECRET).is_ok());
        assert!(validate_refresh_token(&tokens.refresh, SECRET).is_ok());
        assert!(matches!(
            validate_session_token(&tokens.refresh, SECRET),
            Err(JwtError::WrongType { expected: "session" })
        ));
        assert!(validate_refresh_token(&tokens.session, SECRET).is_err());
    }

    #[test]
    fn test_foreign_issuer_is_rejected() {
        let mut claims = Claims::new(Uuid::new_v4(), UserRole::Coach, TokenType::Session);
        claims.iss = "someone-else".to_string();
        let token = create_token(&claims, SECRET).unwrap();
        assert!(matches!(validate_token(&token, SECRET), Err(JwtError::InvalidIssuer)));
    }
}
