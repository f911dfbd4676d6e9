/// Invitation tokens and community link codes
///
/// Invitation tokens are bearer secrets: the plaintext only ever appears in
/// the invite URL handed to the inviter, while the database keeps the
/// SHA-256 hex digest. Community codes are public referral handles and are
/// stored as-is.
///
/// # Format
///
/// - invitation token: `ozi_` + 40 base62 characters
/// - community code: 10 characters from an unambiguous uppercase alphabet
///
/// # Example
///
/// ```
/// use ozza_shared::auth::token::{generate_invite_token, hash_invite_token};
///
/// let (token, hash) = generate_invite_token();
/// assert!(token.starts_with("ozi_"));
/// assert_eq!(hash, hash_invite_token(&token));
/// ```

use rand::Rng;
use sha2::{Digest, Sha256};

const INVITE_PREFIX: &str = "ozi_";

const INVITE_RANDOM_LENGTH: usize = 40;

/// Total length of a well-formed invitation token
pub const INVITE_TOKEN_LENGTH: usize = INVITE_PREFIX.len() + INVITE_RANDOM_LENGTH;

const COMMUNITY_CODE_LENGTH: usize = 10;

const BASE62: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// No 0/O/1/I so codes survive being read aloud or retyped
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Returns `(plaintext_token, sha256_hex)`.
pub fn generate_invite_token() -> (String, String) {
    let token = format!(
        "{}{}",
        INVITE_PREFIX,
        random_string(BASE62, INVITE_RANDOM_LENGTH)
    );
    let hash = hash_invite_token(&token);
    (token, hash)
}

/// SHA-256 hex digest used as the lookup key for invitations
pub fn hash_invite_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

/// Cheap shape check before touching the database
pub fn validate_invite_token_format(token: &str) -> bool {
    let token = token.trim();
    token.len() == INVITE_TOKEN_LENGTH
        && token.starts_with(INVITE_PREFIX)
        && token[INVITE_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric())
}

pub fn generate_community_code() -> String {
    random_string(CODE_ALPHABET, COMMUNITY_CODE_LENGTH)
}

/// Codes are matched case-insensitively; this is the stored form.
pub fn normalize_community_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn random_string(alphabet: &[u8], length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Byte-wise comparison that does not short-circuit on the first mismatch
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
