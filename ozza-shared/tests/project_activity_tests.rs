/// Project tree mutations and the append-only activity log
///
/// Require PostgreSQL via `DATABASE_URL`; skipped otherwise.

#[macro_use]
mod common;

use ozza_shared::models::activity_log::{ActivityAction, ActivityLog, EntityType, NewActivity};
use ozza_shared::models::project::{CreateProject, Project, ProjectStatus, UpdateProject};
use ozza_shared::models::task::{CreateTask, Task, TaskPriority, TaskStatus, UpdateTask};
use sqlx::PgPool;
use uuid::Uuid;

async fn create_project(pool: &PgPool, account_id: Uuid, actor: Uuid) -> Project {
    let mut tx = pool.begin().await.unwrap();
    let project = Project::create(
        &mut *tx,
        CreateProject {
            account_id,
            client_account_id: None,
            name: "Brand refresh".to_string(),
            description: None,
            status: ProjectStatus::Planning,
            start_date: None,
            due_date: None,
            budget_cents: Some(250_000),
            created_by: actor,
        },
    )
    .await
    .unwrap();
    ActivityLog::record(
        &mut *tx,
        NewActivity::created(project.id, actor, EntityType::Project, project.id, &project),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    project
}

#[tokio::test]
async fn test_every_mutation_appends_activity() {
    let pool = require_db!();
    let (coach, account) = common::create_coach(&pool).await;
    let project = create_project(&pool, account.id, coach.id).await;

    let mut tx = pool.begin().await.unwrap();
    let task = Task::create(
        &mut *tx,
        CreateTask {
            project_id: project.id,
            milestone_id: None,
            title: "Moodboard".to_string(),
            description: None,
            priority: TaskPriority::High,
            assignee_id: None,
            due_date: None,
            created_by: coach.id,
        },
    )
    .await
    .unwrap();
    ActivityLog::record(&mut *tx, NewActivity::created(project.id, coach.id, EntityType::Task, task.id, &task))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let done = Task::update(
        &mut *tx,
        project.id,
        task.id,
        UpdateTask {
            status: Some(TaskStatus::Done),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert!(done.completed_at.is_some());
    ActivityLog::record(
        &mut *tx,
        NewActivity::changed(project.id, coach.id, ActivityAction::StatusChanged, EntityType::Task, task.id, &task, &done),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let deleted = Task::delete(&mut *tx, project.id, task.id).await.unwrap().unwrap();
    ActivityLog::record(&mut *tx, NewActivity::deleted(project.id, coach.id, EntityType::Task, task.id, &deleted))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let entries = ActivityLog::list_by_project(&pool, project.id, 50, 0).await.unwrap();
    let actions: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e.entity_type.as_str(), e.action.as_str()))
        .collect();

    assert_eq!(entries.len(), 4);
    assert!(actions.contains(&("project", "created")));
    assert!(actions.contains(&("task", "created")));
    assert!(actions.contains(&("task", "status_changed")));
    assert!(actions.contains(&("task", "deleted")));

    let status_change = entries.iter().find(|e| e.action == "status_changed").unwrap();
    assert_eq!(status_change.old_value.as_ref().unwrap()["status"], "todo");
    assert_eq!(status_change.new_value.as_ref().unwrap()["status"], "done");

    let deletion = entries.iter().find(|e| e.action == "deleted").unwrap();
    assert!(deletion.new_value.is_none());
    assert_eq!(deletion.old_value.as_ref().unwrap()["title"], "Moodboard");
}

#[tokio::test]
async fn test_rolled_back_mutation_leaves_no_activity() {
    let pool = require_db!();
    let (coach, account) = common::create_coach(&pool).await;
    let project = create_project(&pool, account.id, coach.id).await;

    let mut tx = pool.begin().await.unwrap();
    let updated = Project::update(
        &mut *tx,
        project.id,
        UpdateProject {
            name: Some("Renamed".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();
    ActivityLog::record(
        &mut *tx,
        NewActivity::changed(project.id, coach.id, ActivityAction::Updated, EntityType::Project, project.id, &project, &updated),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(ActivityLog::count_by_project(&pool, project.id).await.unwrap(), 1);
    let current = Project::find_by_id(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(current.name, "Brand refresh");
}

#[tokio::test]
async fn test_activity_log_rejects_update_and_delete() {
    let pool = require_db!();
    let (coach, account) = common::create_coach(&pool).await;
    let project = create_project(&pool, account.id, coach.id).await;

    let update = sqlx::query("UPDATE activity_logs SET action = 'tampered' WHERE project_id = $1")
        .bind(project.id)
        .execute(&pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM activity_logs WHERE project_id = $1")
        .bind(project.id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());

    assert_eq!(ActivityLog::count_by_project(&pool, project.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_archive_keeps_history() {
    let pool = require_db!();
    let (coach, account) = common::create_coach(&pool).await;
    let project = create_project(&pool, account.id, coach.id).await;

    let archived = Project::archive(&pool, project.id).await.unwrap().unwrap();
    assert_eq!(archived.status, ProjectStatus::Archived);
    assert_eq!(Project::count_open_for_account(&pool, account.id).await.unwrap(), 0);
    assert_eq!(ActivityLog::count_by_project(&pool, project.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_removing_account_cascades_through_log() {
    let pool = require_db!();
    let (coach, account) = common::create_coach(&pool).await;
    let project = create_project(&pool, account.id, coach.id).await;

    sqlx::query("DELETE FROM ozza_accounts WHERE id = $1")
        .bind(account.id)
        .execute(&pool)
        .await
        .expect("cascade through activity_logs is allowed");

    assert!(Project::find_by_id(&pool, project.id).await.unwrap().is_none());
    assert_eq!(ActivityLog::count_by_project(&pool, project.id).await.unwrap(), 0);
}
