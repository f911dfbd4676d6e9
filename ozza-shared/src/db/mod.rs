/// Database layer for Ozza
///
/// - `pool`: PostgreSQL connection pool with a startup health check
/// - `migrations`: embedded sqlx migrations from the workspace `migrations/` directory
/// - `retry`: exponential backoff for the few reads allowed to retry
///
/// Models live in the crate-level `models` module.
///
/// # Example
///
/// ```no_run
/// use ozza_shared::db::pool::{create_pool, DatabaseConfig};
/// use ozza_shared::db::migrations::run_migrations;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool(DatabaseConfig::from_url(std::env::var("DATABASE_URL")?)).await?;
///     run_migrations(&pool).await?;
///     Ok(())
/// }
/// ```

pub mod migrations;
pub mod pool;
pub mod retry;
