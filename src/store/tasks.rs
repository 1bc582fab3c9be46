// Task records and their status machine
//
// pending -> active -> completed | failed, plus pending -> failed on cancel.
// Terminal tasks are never written again.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{opt_time_column, time_column, to_sql_time, Store};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;
pub const DEFAULT_PRIORITY: u8 = 3;

/// Result text written by `cancel_task`
const CANCELLED_RESULT: &str = "Cancelled";

const TASK_COLUMNS: &str = "id, title, description, status, priority, scheduled_at, cwd, \
                            result, created_at, updated_at, completed_at";

/// Task execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Completed and failed tasks are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses a task may be in immediately before moving to `self`
    fn predecessors(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Pending => &[],
            TaskStatus::Active => &[TaskStatus::Pending],
            TaskStatus::Completed => &[TaskStatus::Active],
            TaskStatus::Failed => &[TaskStatus::Pending, TaskStatus::Active],
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "active" => Ok(TaskStatus::Active),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => bail!("Unknown task status: '{}'", other),
        }
    }
}

/// Clamp an arbitrary priority into 1..=5, falling back to the default
pub fn normalize_priority(value: Option<i64>) -> u8 {
    value
        .filter(|p| (i64::from(MIN_PRIORITY)..=i64::from(MAX_PRIORITY)).contains(p))
        .map(|p| p as u8)
        .unwrap_or(DEFAULT_PRIORITY)
}

/// A unit of background work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: u8,
    /// `None` means eligible on the next tick
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Working directory hint for the AI subprocess
    pub cwd: Option<String>,
    /// Clean response text on completion, error message on failure
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly when the task reaches a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for `Store::create_task`
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            priority: DEFAULT_PRIORITY,
            scheduled_at: None,
            cwd: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Number of tasks per status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.active + self.completed + self.failed
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(3)?;
    let status = status_raw.parse::<TaskStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;
    let priority: i64 = row.get(4)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        priority: normalize_priority(Some(priority)),
        scheduled_at: opt_time_column(row, 5)?,
        cwd: row.get(6)?,
        result: row.get(7)?,
        created_at: time_column(row, 8)?,
        updated_at: time_column(row, 9)?,
        completed_at: opt_time_column(row, 10)?,
    })
}

fn fetch_task(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    conn.query_row(&sql, [id], task_from_row)
        .optional()
        .with_context(|| format!("Failed to load task {}", id))
}

impl Store {
    /// Insert a new pending task
    pub async fn create_task(&self, task: NewTask) -> Result<Task> {
        let title = task.title.trim();
        if title.is_empty() {
            bail!("Task title must not be empty");
        }
        let priority = normalize_priority(Some(i64::from(task.priority)));
        let scheduled_at = task.scheduled_at.as_ref().map(to_sql_time);
        let cwd = task
            .cwd
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO tasks (title, description, priority, scheduled_at, cwd)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, task.description, priority, scheduled_at, cwd],
        )
        .context("Failed to insert task")?;

        let id = conn.last_insert_rowid();
        let created =
            fetch_task(&conn, id)?.ok_or_else(|| anyhow!("Task {} missing after insert", id))?;

        tracing::debug!(task_id = id, title = %created.title, "Task created");
        Ok(created)
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.db.lock().await;
        fetch_task(&conn, id)
    }

    /// All tasks, optionally filtered by status, in creation order
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let conn = self.db.lock().await;
        let tasks = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM tasks WHERE status = ?1 ORDER BY id",
                    TASK_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([status.as_str()], task_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("SELECT {} FROM tasks ORDER BY id", TASK_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], task_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(tasks)
    }

    /// Move a task to `status` in one statement.
    ///
    /// Returns `false` (and writes nothing) when the task does not exist or
    /// its current status is not a legal predecessor of `status`.
    /// Moving to `active` clears any previous result; `completed_at` is set
    /// iff the new status is terminal.
    pub async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        result: Option<&str>,
    ) -> Result<bool> {
        let predecessors = status.predecessors();
        if predecessors.is_empty() {
            tracing::warn!(task_id = id, %status, "Rejected transition to a non-reachable status");
            return Ok(false);
        }

        let allowed = predecessors
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE tasks
             SET status = ?2,
                 result = ?3,
                 updated_at = datetime('now'),
                 completed_at = CASE WHEN ?2 IN ('completed', 'failed')
                                     THEN datetime('now') ELSE NULL END
             WHERE id = ?1 AND status IN ({})",
            allowed
        );

        let conn = self.db.lock().await;
        let changed = conn
            .execute(&sql, params![id, status.as_str(), result])
            .with_context(|| format!("Failed to update status of task {}", id))?;

        if changed == 0 {
            tracing::debug!(task_id = id, %status, "Status transition rejected");
        }
        Ok(changed == 1)
    }

    /// Pending tasks whose scheduled time is absent or has passed
    pub async fn get_due_tasks(&self) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks
             WHERE status = 'pending'
               AND (scheduled_at IS NULL OR scheduled_at <= datetime('now'))
             ORDER BY id",
            TASK_COLUMNS
        );
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to query due tasks")?;
        Ok(tasks)
    }

    /// Force a pending task to failed. No-op (`false`) for any other status.
    pub async fn cancel_task(&self, id: i64) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = conn
            .execute(
                "UPDATE tasks
                 SET status = 'failed',
                     result = ?2,
                     updated_at = datetime('now'),
                     completed_at = datetime('now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id, CANCELLED_RESULT],
            )
            .with_context(|| format!("Failed to cancel task {}", id))?;

        if changed == 1 {
            tracing::info!(task_id = id, "Task cancelled");
        }
        Ok(changed == 1)
    }

    pub async fn count_by_status(&self) -> Result<TaskCounts> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = TaskCounts::default();
        for (status, count) in rows {
            let count = count as usize;
            match status.parse::<TaskStatus>()? {
                TaskStatus::Pending => counts.pending = count,
                TaskStatus::Active => counts.active = count,
                TaskStatus::Completed => counts.completed = count,
                TaskStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    // ── creation ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_task_defaults() {
        let store = store();
        let task = store.create_task(NewTask::new("Check weather")).await.unwrap();

        assert_eq!(task.title, "Check weather");
        assert_eq!(task.description, "");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(task.scheduled_at.is_none());
        assert!(task.cwd.is_none());
        assert!(task.result.is_none());
        assert!(task.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_create_task_ids_are_monotonic() {
        let store = store();
        let a = store.create_task(NewTask::new("a")).await.unwrap();
        let b = store.create_task(NewTask::new("b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_create_task_rejects_blank_title() {
        let store = store();
        assert!(store.create_task(NewTask::new("   ")).await.is_err());
    }

    #[tokio::test]
    async fn test_create_task_out_of_range_priority_defaults() {
        let store = store();
        let task = store
            .create_task(NewTask::new("p").with_priority(9))
            .await
            .unwrap();
        assert_eq!(task.priority, DEFAULT_PRIORITY);
    }

    #[tokio::test]
    async fn test_create_task_blank_cwd_is_dropped() {
        let store = store();
        let task = store
            .create_task(NewTask::new("c").with_cwd("  "))
            .await
            .unwrap();
        assert!(task.cwd.is_none());
    }

    // ── status transitions ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_full_lifecycle_sets_completed_at_only_when_terminal() {
        let store = store();
        let task = store.create_task(NewTask::new("t")).await.unwrap();

        assert!(store
            .update_task_status(task.id, TaskStatus::Active, None)
            .await
            .unwrap());
        let active = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(active.status, TaskStatus::Active);
        assert!(active.completed_at.is_none());
        assert!(active.result.is_none());

        assert!(store
            .update_task_status(task.id, TaskStatus::Completed, Some("done"))
            .await
            .unwrap());
        let done = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("done"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_pending_cannot_jump_to_completed() {
        let store = store();
        let task = store.create_task(NewTask::new("t")).await.unwrap();
        let ok = store
            .update_task_status(task.id, TaskStatus::Completed, Some("x"))
            .await
            .unwrap();
        assert!(!ok);
        let reloaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Pending);
        assert!(reloaded.result.is_none());
    }

    #[tokio::test]
    async fn test_terminal_tasks_are_immutable() {
        let store = store();
        let task = store.create_task(NewTask::new("t")).await.unwrap();
        store
            .update_task_status(task.id, TaskStatus::Active, None)
            .await
            .unwrap();
        store
            .update_task_status(task.id, TaskStatus::Failed, Some("boom"))
            .await
            .unwrap();

        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let ok = store
                .update_task_status(task.id, status, Some("again"))
                .await
                .unwrap();
            assert!(!ok, "transition failed -> {} must be rejected", status);
        }
        let reloaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.result.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_update_unknown_task_returns_false() {
        let store = store();
        assert!(!store
            .update_task_status(42, TaskStatus::Active, None)
            .await
            .unwrap());
    }

    // ── due query ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_due_tasks_respect_schedule() {
        let store = store();
        let now_task = store.create_task(NewTask::new("now")).await.unwrap();
        let past = store
            .create_task(NewTask::new("past").scheduled_at(Utc::now() - Duration::hours(1)))
            .await
            .unwrap();
        let future = store
            .create_task(NewTask::new("future").scheduled_at(Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let due: Vec<i64> = store
            .get_due_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(due, vec![now_task.id, past.id]);
        assert!(!due.contains(&future.id));
    }

    #[tokio::test]
    async fn test_due_tasks_exclude_non_pending() {
        let store = store();
        let task = store.create_task(NewTask::new("t")).await.unwrap();
        store
            .update_task_status(task.id, TaskStatus::Active, None)
            .await
            .unwrap();
        assert!(store.get_due_tasks().await.unwrap().is_empty());
    }

    // ── cancellation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cancel_only_from_pending() {
        let store = store();
        let pending = store.create_task(NewTask::new("p")).await.unwrap();
        let active = store.create_task(NewTask::new("a")).await.unwrap();
        store
            .update_task_status(active.id, TaskStatus::Active, None)
            .await
            .unwrap();

        assert!(store.cancel_task(pending.id).await.unwrap());
        assert!(!store.cancel_task(pending.id).await.unwrap());
        assert!(!store.cancel_task(active.id).await.unwrap());
        assert!(!store.cancel_task(999).await.unwrap());

        let cancelled = store.get_task(pending.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Failed);
        assert!(cancelled.completed_at.is_some());
    }

    // ── listing ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_list_and_count_by_status() {
        let store = store();
        let a = store.create_task(NewTask::new("a")).await.unwrap();
        store.create_task(NewTask::new("b")).await.unwrap();
        store.cancel_task(a.id).await.unwrap();

        assert_eq!(store.list_tasks(None).await.unwrap().len(), 2);
        assert_eq!(
            store.list_tasks(Some(TaskStatus::Failed)).await.unwrap()[0].id,
            a.id
        );

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }
}
