/// Database models and their queries
///
/// Each model is a `sqlx::FromRow` struct with associated async functions.
/// Query functions take `impl PgExecutor<'_>` so they run against the pool
/// or inside a caller's transaction (`&mut *tx`).
///
/// # Models
///
/// - `user`, `account`, `membership`: identity and tenancy
/// - `invitation`, `community_link`: onboarding
/// - `project`, `milestone`, `task`, `deliverable`, `comment`, `time_entry`,
///   `file`: the project tree
/// - `activity_log`: append-only per-project audit trail
/// - `usage`, `integration`, `webhook`: billing and outbound events
/// - `security_log`: admin-facing security events
///
/// # Example
///
/// ```no_run
/// use ozza_shared::models::user::{CreateUser, User, UserRole};
/// use ozza_shared::models::account::{Account, AccountKind, CreateAccount};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), sqlx::Error> {
/// let mut tx = pool.begin().await?;
///
/// let user = User::create(&mut *tx, CreateUser {
///     email: "casey@example.com".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     name: Some("Casey".to_string()),
///     role: UserRole::Coach,
/// })
/// .await?;
///
/// Account::create(&mut *tx, CreateAccount {
///     name: "Casey Coaching".to_string(),
///     kind: AccountKind::Coach,
///     owner_id: user.id,
///     parent_account_id: None,
/// })
/// .await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

pub mod account;
pub mod activity_log;
pub mod comment;
pub mod community_link;
pub mod deliverable;
pub mod file;
pub mod integration;
pub mod invitation;
pub mod membership;
pub mod milestone;
pub mod project;
pub mod security_log;
pub mod task;
pub mod time_entry;
pub mod usage;
pub mod user;
pub mod webhook;
