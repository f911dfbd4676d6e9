/// Authentication and authorization
///
/// # Modules
///
/// - [`password`]: Argon2id hashing and strength rules
/// - [`jwt`]: HS256 session and refresh tokens carrying the user role
/// - [`token`]: invite tokens and community link codes
/// - [`middleware`]: request authentication into an [`middleware::AuthContext`]
/// - [`authorization`]: user-role, account-role and project access checks
///
/// # Example
///
/// ```no_run
/// use ozza_shared::auth::password::{hash_password, verify_password};
/// use ozza_shared::auth::jwt::{create_token, Claims, TokenType};
/// use ozza_shared::models::user::UserRole;
///
/// # fn example(user_id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("correct horse 9")?;
/// assert!(verify_password("correct horse 9", &hash)?);
///
/// let claims = Claims::new(user_id, UserRole::Coach, TokenType::Session);
/// let token = create_token(&claims, "a-secret-of-at-least-thirty-two-chars")?;
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod token;
