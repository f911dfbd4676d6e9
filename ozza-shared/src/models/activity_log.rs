/// Per-project activity log
///
/// Every mutation of the project tree appends one row here inside the same
/// transaction as the mutation itself, so a change and its log entry commit
/// or roll back together. Rows carry JSON snapshots of the entity before
/// (`old_value`) and after (`new_value`) the change.
///
/// The table is append-only: a trigger rejects `UPDATE` and direct
/// `DELETE`. This module therefore exposes no update or delete operations.
///
/// # Example
///
/// ```no_run
/// use ozza_shared::models::activity_log::{ActivityAction, ActivityLog, EntityType, NewActivity};
/// # async fn example(pool: sqlx::PgPool, project: ozza_shared::models::project::Project, actor: uuid::Uuid) -> Result<(), sqlx::Error> {
/// let mut tx = pool.begin().await?;
/// ActivityLog::record(&mut *tx, NewActivity::created(
///     project.id,
///     actor,
///     EntityType::Project,
///     project.id,
///     &project,
/// ))
/// .await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgExecutor;
use std::fmt;
use uuid::Uuid;

use super::project::MEMBER_SEES_PROJECT;

const ACTIVITY_COLUMNS: &str =
    "id, project_id, actor_id, action, entity_type, entity_id, old_value, new_value, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
    StatusChanged,
    Reviewed,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Updated => "updated",
            ActivityAction::Deleted => "deleted",
            ActivityAction::StatusChanged => "status_changed",
            ActivityAction::Reviewed => "reviewed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Milestone,
    Task,
    Deliverable,
    Comment,
    TimeEntry,
    File,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Milestone => "milestone",
            EntityType::Task => "task",
            EntityType::Deliverable => "deliverable",
            EntityType::Comment => "comment",
            EntityType::TimeEntry => "time_entry",
            EntityType::File => "file",
        }
    }

    /// Webhook event name for an action on this entity, e.g. `task.created`
    pub fn event_name(&self, action: ActivityAction) -> String {
        format!("{}.{}", self.as_str(), action.as_str())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// One entry to append
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub project_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: ActivityAction,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub old_value: Option<JsonValue>,
    pub new_value: Option<JsonValue>,
}

fn snapshot<T: Serialize>(value: &T) -> Option<JsonValue> {
    // Model structs serialize infallibly; a failure would only drop the snapshot.
    serde_json::to_value(value).ok()
}

impl NewActivity {
    pub fn created<T: Serialize>(
        project_id: Uuid,
        actor_id: Uuid,
        entity_type: EntityType,
        entity_id: Uuid,
        new: &T,
    ) -> Self {
        Self {
            project_id,
            actor_id: Some(actor_id),
            action: ActivityAction::Created,
            entity_type,
            entity_id,
            old_value: None,
            new_value: snapshot(new),
        }
    }

    pub fn changed<T: Serialize>(
        project_id: Uuid,
        actor_id: Uuid,
        action: ActivityAction,
        entity_type: EntityType,
        entity_id: Uuid,
        old: &T,
        new: &T,
    ) -> Self {
        Self {
            project_id,
            actor_id: Some(actor_id),
            action,
            entity_type,
            entity_id,
            old_value: snapshot(old),
            new_value: snapshot(new),
        }
    }

    pub fn deleted<T: Serialize>(
        project_id: Uuid,
        actor_id: Uuid,
        entity_type: EntityType,
        entity_id: Uuid,
        old: &T,
    ) -> Self {
        Self {
            project_id,
            actor_id: Some(actor_id),
            action: ActivityAction::Deleted,
            entity_type,
            entity_id,
            old_value: snapshot(old),
            new_value: None,
        }
    }

    /// Webhook event name for this entry
    pub fn event_name(&self) -> String {
        self.entity_type.event_name(self.action)
    }
}

impl ActivityLog {
    /// Appends one entry. Pass the mutation's transaction as `db`.
    pub async fn record(db: impl PgExecutor<'_>, entry: NewActivity) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ActivityLog>(&format!(
            "INSERT INTO activity_logs (project_id, actor_id, action, entity_type, entity_id,
                                        old_value, new_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ACTIVITY_COLUMNS}"
        ))
        .bind(entry.project_id)
        .bind(entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(entry.old_value)
        .bind(entry.new_value)
        .fetch_one(db)
        .await
    }

    /// Newest first
    pub async fn list_by_project(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLog>(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_logs
             WHERE project_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
    }

    pub async fn count_by_project(db: impl PgExecutor<'_>, project_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM activity_logs WHERE project_id = $1")
            .bind(project_id)
            .fetch_one(db)
            .await
    }

    /// Latest entries across every project the user can see
    pub async fn recent_for_user(
        db: impl PgExecutor<'_>,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLog>(&format!(
            "SELECT l.id, l.project_id, l.actor_id, l.action, l.entity_type, l.entity_id,
                    l.old_value, l.new_value, l.created_at
             FROM activity_logs l
             JOIN projects p ON p.id = l.project_id
             WHERE EXISTS (
                 SELECT 1 FROM ozza_account_members m
                 WHERE m.user_id = $1
                   AND ({MEMBER_SEES_PROJECT})
             )
             ORDER BY l.created_at DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(db)
        .await
    }
}
