/// Password hashing with Argon2id
///
/// Parameters: 64 MiB memory, 3 passes, 4 lanes, 32-byte output. Hashes
/// are PHC strings, so verification reads the parameters back out of the
/// stored value and old hashes keep verifying if the parameters change.
///
/// Hashing takes tens of milliseconds of CPU; request handlers call the
/// `_blocking` wrappers, which move the work onto tokio's blocking pool.
///
/// ```
/// use ozza_shared::auth::password::{hash_password, verify_password};
///
/// let hash = hash_password("Sunrise-2024").unwrap();
/// assert!(verify_password("Sunrise-2024", &hash).unwrap());
/// assert!(!verify_password("sunrise-2024", &hash).unwrap());
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashError(String),

    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),

    #[error("Password hashing task failed: {0}")]
    TaskFailed(String),
}

fn hasher() -> Result<Argon2<'static>, PasswordError> {
    let params = ParamsBuilder::new()
        .m_cost(65536)
        .t_cost(3)
        .p_cost(4)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

    Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashError(e.to_string()))
}

/// `Ok(false)` for a wrong password; `Err` only when `hash` is unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;
    if parsed.hash.is_none() {
        return Err(PasswordError::InvalidHash("missing hash output".to_string()));
    }

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(e.to_string())),
    }
}

/// [`hash_password`] on the blocking pool
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
}

/// [`verify_password`] on the blocking pool
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
}

/// Signup rule: 8 to 128 characters with at least one letter and one digit.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    let length = password.chars().count();

    if length < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        ));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at most {} characters long",
            MAX_PASSWORD_LENGTH
        ));
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err("Password must contain at least one letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_uses_argon2id_parameters() {
        let hash = hash_password("coach-pass-1").expect("hash");
        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("v=19"));
        assert!(hash.contains("m=65536"));
        assert!(hash.contains("t=3"));
        assert!(hash.contains("p=4"));
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same-password-1").expect("hash");
        let b = hash_password("same-password-1").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify() {
        let hash = hash_password("agency-pass-9").expect("hash");
        assert!(verify_password("agency-pass-9", &hash).unwrap());
        assert!(!verify_password("agency-pass-8", &hash).unwrap());
        assert!(!verify_password("", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(verify_password("password", "not-a-hash").is_err());
        assert!(matches!(
            verify_password("password", "$argon2id$broken"),
            Err(PasswordError::InvalidHash(_))
        ));
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let hash = hash_password_blocking("client-pass-3".to_string())
            .await
            .expect("hash");
        assert!(verify_password_blocking("client-pass-3".to_string(), hash)
            .await
            .expect("verify"));
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("abcdefg1").is_ok());
        assert!(validate_password_strength("Sunrise-2024").is_ok());

        let err = validate_password_strength("a1").unwrap_err();
        assert!(err.contains("at least 8"));

        let err = validate_password_strength("abcdefgh").unwrap_err();
        assert!(err.contains("digit"));

        let err = validate_password_strength("12345678").unwrap_err();
        assert!(err.contains("letter"));

        let err = validate_password_strength(&format!("a1{}", "x".repeat(127))).unwrap_err();
        assert!(err.contains("at most 128"));
    }
}
