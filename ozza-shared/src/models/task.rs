/// Project tasks
///
/// Tasks hang off a project and optionally a milestone of the same project.
/// `completed_at` follows `status`: it is stamped the first time a task
/// reaches `done` and cleared when it leaves `done`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, project_id, milestone_id, title, description, status, priority, \
     assignee_id, due_date, created_by, completed_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub milestone_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub created_by: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTask {
    pub project_id: Uuid,
    pub milestone_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTask {
    pub milestone_id: Option<Option<Uuid>>,
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Option<Uuid>>,
    pub due_date: Option<Option<NaiveDate>>,
}

/// Open vs. finished task counts for a project
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct TaskCounts {
    pub total: i64,
    pub done: i64,
    pub overdue: i64,
}

impl Task {
    pub async fn create(db: impl PgExecutor<'_>, data: CreateTask) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (project_id, milestone_id, title, description, priority,
                                assignee_id, due_date, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(data.project_id)
        .bind(data.milestone_id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.priority)
        .bind(data.assignee_id)
        .bind(data.due_date)
        .bind(data.created_by)
        .fetch_one(db)
        .await
    }

    pub async fn find(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND project_id = $2"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }

    pub async fn list_by_project(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = "));
        query.push_bind(project_id);

        if let Some(status) = status {
            query.push(" AND status = ").push_bind(status);
        }

        query.push(" ORDER BY created_at ASC");
        query.build_query_as::<Task>().fetch_all(db).await
    }

    /// Tasks assigned to the user across all projects, not yet done
    pub async fn list_open_for_assignee(
        db: impl PgExecutor<'_>,
        assignee_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE assignee_id = $1 AND status <> 'done'
             ORDER BY due_date ASC NULLS LAST, created_at ASC
             LIMIT $2"
        ))
        .bind(assignee_id)
        .bind(limit)
        .fetch_all(db)
        .await
    }

    pub async fn update(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
        data: UpdateTask,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE tasks SET updated_at = NOW()");

        if let Some(milestone_id) = data.milestone_id {
            query.push(", milestone_id = ").push_bind(milestone_id);
        }
        if let Some(title) = data.title {
            query.push(", title = ").push_bind(title);
        }
        if let Some(description) = data.description {
            query.push(", description = ").push_bind(description);
        }
        if let Some(status) = data.status {
            query.push(", status = ").push_bind(status);
            if status.is_done() {
                query.push(", completed_at = COALESCE(completed_at, NOW())");
            } else {
                query.push(", completed_at = NULL");
            }
        }
        if let Some(priority) = data.priority {
            query.push(", priority = ").push_bind(priority);
        }
        if let Some(assignee_id) = data.assignee_id {
            query.push(", assignee_id = ").push_bind(assignee_id);
        }
        if let Some(due_date) = data.due_date {
            query.push(", due_date = ").push_bind(due_date);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" AND project_id = ").push_bind(project_id);
        query.push(format!(" RETURNING {TASK_COLUMNS}"));

        query.build_query_as::<Task>().fetch_optional(db).await
    }

    pub async fn delete(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(&format!(
            "DELETE FROM tasks WHERE id = $1 AND project_id = $2 RETURNING {TASK_COLUMNS}"
        ))
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await
    }

    pub async fn counts_for_project(
        db: impl PgExecutor<'_>,
        project_id: Uuid,
    ) -> Result<TaskCounts, sqlx::Error> {
        sqlx::query_as::<_, TaskCounts>(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'done') AS done,
                    COUNT(*) FILTER (WHERE status <> 'done' AND due_date < CURRENT_DATE) AS overdue
             FROM tasks
             WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(db)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_strings() {
        assert_eq!(TaskStatus::InProgress.as_str(), "in_progress");
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
        assert!(TaskStatus::Done.is_done());
        assert!(!TaskStatus::Review.is_done());
    }

    #[test]
    fn test_default_priority_is_medium() {
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
        let parsed: TaskPriority = serde_json::from_str("\"urgent\"").unwrap();
        assert_eq!(parsed, TaskPriority::Urgent);
    }
}
