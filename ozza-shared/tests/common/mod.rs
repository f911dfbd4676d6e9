//! Shared helpers for database integration tests
//!
//! Tests call `require_db!()` first; without `DATABASE_URL` they print a
//! notice and return early so `cargo test` passes on machines without
//! PostgreSQL.

#![allow(dead_code)]

use ozza_shared::auth::password::hash_password;
use ozza_shared::db::migrations::run_migrations;
use ozza_shared::db::pool::{create_pool, DatabaseConfig};
use ozza_shared::models::account::Account;
use ozza_shared::models::user::{CreateUser, User, UserRole};
use ozza_shared::onboarding::create_coach_root;
use sqlx::PgPool;
use uuid::Uuid;

/// Migrated pool, or `None` when no database is configured
pub async fn test_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;

    let pool = create_pool(DatabaseConfig {
        max_connections: 5,
        ..DatabaseConfig::from_url(url)
    })
    .await
    .expect("Failed to connect to test database");

    run_migrations(&pool).await.expect("Failed to run migrations");
    Some(pool)
}

#[macro_export]
macro_rules! require_db {
    () => {
        match common::test_pool().await {
            Some(pool) => pool,
            None => {
                eprintln!("DATABASE_URL not set; skipping database test");
                return;
            }
        }
    };
}

pub fn unique_email(prefix: &str) -> String {
    format!("{}+{}@example.com", prefix, Uuid::new_v4().simple())
}

pub async fn create_user(pool: &PgPool, role: UserRole) -> User {
    User::create(
        pool,
        CreateUser {
            email: unique_email(role.as_str()),
            password_hash: hash_password("password123").expect("hash"),
            name: Some(format!("Test {}", role.as_str())),
            role,
        },
    )
    .await
    .expect("Failed to create user")
}

/// A coach with a root account
pub async fn create_coach(pool: &PgPool) -> (User, Account) {
    let user = create_user(pool, UserRole::Coach).await;
    let mut conn = pool.acquire().await.expect("acquire");
    let account = create_coach_root(&mut conn, &user).await.expect("Failed to create root account");
    (user, account)
}
