/// Integration tests for the SQL migrations
///
/// Require PostgreSQL via `DATABASE_URL`; skipped otherwise.

#[macro_use]
mod common;

use ozza_shared::db::migrations::{get_migration_status, run_migrations};

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let pool = require_db!();

    run_migrations(&pool).await.expect("second run");
    let status = get_migration_status(&pool).await.expect("status");

    assert!(status.applied_migrations > 0);
    assert!(status.is_up_to_date);
    assert_eq!(status.applied_migrations, status.known_migrations);
}

#[tokio::test]
async fn test_migration_creates_all_tables() {
    let pool = require_db!();

    let expected = [
        "users",
        "ozza_accounts",
        "ozza_account_members",
        "invitations",
        "community_links",
        "projects",
        "milestones",
        "tasks",
        "deliverables",
        "comments",
        "time_entries",
        "project_files",
        "activity_logs",
        "usage_counters",
        "integrations",
        "webhooks",
        "security_logs",
    ];

    for table in expected {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM information_schema.tables
                 WHERE table_schema = 'public' AND table_name = $1
             )",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .expect("query");

        assert!(exists, "table {table} is missing");
    }
}

#[tokio::test]
async fn test_migration_creates_enums() {
    let pool = require_db!();

    let expected = [
        "user_role",
        "account_kind",
        "member_role",
        "invitation_kind",
        "invitation_status",
        "project_status",
        "task_status",
        "task_priority",
        "deliverable_status",
    ];

    for type_name in expected {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM pg_type WHERE typname = $1)")
                .bind(type_name)
                .fetch_one(&pool)
                .await
                .expect("query");

        assert!(exists, "enum {type_name} is missing");
    }
}

#[tokio::test]
async fn test_email_is_stored_lowercase_only() {
    let pool = require_db!();

    let result = sqlx::query("INSERT INTO users (email, password_hash, role) VALUES ($1, 'x', 'coach')")
        .bind(format!("Mixed.{}@Example.com", uuid::Uuid::new_v4().simple()))
        .execute(&pool)
        .await;

    assert!(result.is_err(), "mixed-case email must be rejected by the CHECK constraint");
}
