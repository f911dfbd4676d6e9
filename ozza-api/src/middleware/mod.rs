/// Middleware for the API server
///
/// - `auth`: session authentication and the admin console guard
/// - `security`: security response headers

pub mod auth;
pub mod security;
