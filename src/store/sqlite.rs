//! SQLite-backed task store.
//!
//! Persists reminder task definitions and their dispatch history in a
//! single SQLite database file at `{root_dir}/tasks.db`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, params};
use uuid::Uuid;

use super::schema::{apply_schema, read_schema_version};
use crate::task::{FireOutcome, FireRecord, Task};

/// Database filename within the data root directory.
const DB_FILENAME: &str = "tasks.db";

/// Default number of fire-history rows retained per task.
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// SQLite-backed store for reminder tasks and fire history.
///
/// Thread-safe via an internal `Mutex<Connection>`. All writes are
/// serialized; reads can proceed concurrently with WAL mode on the
/// SQLite side, though we still acquire the mutex for simplicity.
pub struct TaskStore {
    root: PathBuf,
    conn: Mutex<Connection>,
    history_limit: usize,
}

impl TaskStore {
    /// Open (or create) the SQLite database at `{root_dir}/tasks.db`.
    ///
    /// Applies the schema if the database is new.
    pub fn open(root_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root_dir).map_err(|e| StoreError::Io(e.to_string()))?;
        let db_path = root_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path).map_err(StoreError::Sqlite)?;
        apply_schema(&conn).map_err(StoreError::Sqlite)?;
        Ok(Self {
            root: root_dir.to_path_buf(),
            conn: Mutex::new(conn),
            history_limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    /// Override the per-task fire-history retention limit.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Returns the data root directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        read_schema_version(&conn).map_err(StoreError::Sqlite)
    }

    /// Insert a new task record.
    pub fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks \
             (id, title, topic, message, cron, enabled, snoozed_until, \
              created_at, updated_at, last_fired_at, fire_count, last_error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.id,
                task.title,
                task.topic,
                task.message,
                task.cron,
                task.enabled,
                task.snoozed_until,
                task.created_at,
                task.updated_at,
                task.last_fired_at,
                task.fire_count,
                task.last_error,
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    /// Fetch a single task by id.
    pub fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, topic, message, cron, enabled, snoozed_until, \
                 created_at, updated_at, last_fired_at, fire_count, last_error \
                 FROM tasks WHERE id = ?1",
            )
            .map_err(StoreError::Sqlite)?;
        let mut rows = stmt.query(params![id]).map_err(StoreError::Sqlite)?;
        match rows.next().map_err(StoreError::Sqlite)? {
            Some(row) => Ok(Some(row_to_task(row).map_err(StoreError::Sqlite)?)),
            None => Ok(None),
        }
    }

    /// List all tasks, oldest first.
    pub fn list(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, topic, message, cron, enabled, snoozed_until, \
                 created_at, updated_at, last_fired_at, fire_count, last_error \
                 FROM tasks ORDER BY created_at, id",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map([], row_to_task)
            .map_err(StoreError::Sqlite)?;

        let mut tasks = Vec::new();
        for r in rows {
            tasks.push(r.map_err(StoreError::Sqlite)?);
        }
        Ok(tasks)
    }

    /// List tasks that should be scheduled (enabled), oldest first.
    pub fn list_enabled(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, topic, message, cron, enabled, snoozed_until, \
                 created_at, updated_at, last_fired_at, fire_count, last_error \
                 FROM tasks WHERE enabled = 1 ORDER BY created_at, id",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map([], row_to_task)
            .map_err(StoreError::Sqlite)?;

        let mut tasks = Vec::new();
        for r in rows {
            tasks.push(r.map_err(StoreError::Sqlite)?);
        }
        Ok(tasks)
    }

    /// Rewrite a full task row.
    pub fn update(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn
            .execute(
                "UPDATE tasks SET title = ?1, topic = ?2, message = ?3, cron = ?4, \
                 enabled = ?5, snoozed_until = ?6, updated_at = ?7, \
                 last_fired_at = ?8, fire_count = ?9, last_error = ?10 \
                 WHERE id = ?11",
                params![
                    task.title,
                    task.topic,
                    task.message,
                    task.cron,
                    task.enabled,
                    task.snoozed_until,
                    task.updated_at,
                    task.last_fired_at,
                    task.fire_count,
                    task.last_error,
                    task.id,
                ],
            )
            .map_err(StoreError::Sqlite)?;

        if rows == 0 {
            return Err(StoreError::NotFound(task.id.clone()));
        }
        Ok(())
    }

    /// Delete a task. Returns `true` when a row was removed; history rows
    /// cascade.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .map_err(StoreError::Sqlite)?;
        Ok(rows > 0)
    }

    /// Flip the enabled flag. Returns `true` when the task exists.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let now = crate::task::now_epoch_secs();
        let rows = conn
            .execute(
                "UPDATE tasks SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
                params![enabled, now, id],
            )
            .map_err(StoreError::Sqlite)?;
        Ok(rows > 0)
    }

    /// Record the outcome of a dispatch attempt (transactional).
    ///
    /// Bumps `fire_count`, sets `last_fired_at` and `last_error`, appends a
    /// history row, and prunes that task's history beyond the retention
    /// limit. A task deleted while its fire was in flight is a no-op.
    pub fn record_fire(
        &self,
        task_id: &str,
        at: i64,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;

        let rows = tx
            .execute(
                "UPDATE tasks SET last_fired_at = ?1, fire_count = fire_count + 1, \
                 last_error = ?2 WHERE id = ?3",
                params![at, error, task_id],
            )
            .map_err(StoreError::Sqlite)?;

        // Task gone: nothing to attribute the outcome to.
        if rows == 0 {
            return Ok(());
        }

        let outcome = if error.is_some() {
            FireOutcome::Failed
        } else {
            FireOutcome::Delivered
        };
        tx.execute(
            "INSERT INTO fire_history (id, task_id, outcome, detail, at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                task_id,
                outcome_to_str(outcome),
                error.unwrap_or(""),
                at,
            ],
        )
        .map_err(StoreError::Sqlite)?;

        // Keep per-task history bounded.
        tx.execute(
            "DELETE FROM fire_history WHERE task_id = ?1 AND id NOT IN \
             (SELECT id FROM fire_history WHERE task_id = ?1 \
              ORDER BY at DESC, id DESC LIMIT ?2)",
            params![task_id, self.history_limit as i64],
        )
        .map_err(StoreError::Sqlite)?;

        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    /// Fetch a task's fire history, newest first.
    pub fn history(&self, task_id: &str, limit: usize) -> Result<Vec<FireRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, outcome, detail, at FROM fire_history \
                 WHERE task_id = ?1 ORDER BY at DESC, id DESC LIMIT ?2",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![task_id, limit as i64], row_to_fire)
            .map_err(StoreError::Sqlite)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r.map_err(StoreError::Sqlite)?);
        }
        Ok(records)
    }

    /// Acquire the connection mutex.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the SQLite task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        topic: row.get(2)?,
        message: row.get(3)?,
        cron: row.get(4)?,
        enabled: row.get(5)?,
        snoozed_until: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        last_fired_at: row.get(9)?,
        fire_count: row.get(10)?,
        last_error: row.get(11)?,
    })
}

fn row_to_fire(row: &rusqlite::Row<'_>) -> rusqlite::Result<FireRecord> {
    let outcome_str: String = row.get(2)?;
    Ok(FireRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        outcome: str_to_outcome(&outcome_str),
        detail: row.get(3)?,
        at: row.get(4)?,
    })
}

fn outcome_to_str(outcome: FireOutcome) -> &'static str {
    match outcome {
        FireOutcome::Delivered => "delivered",
        FireOutcome::Failed => "failed",
    }
}

fn str_to_outcome(s: &str) -> FireOutcome {
    match s {
        "delivered" => FireOutcome::Delivered,
        _ => FireOutcome::Failed, // conservative fallback
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::task::NewTask;

    fn test_store() -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let store = TaskStore::open(dir.path()).expect("open TaskStore");
        (dir, store)
    }

    fn sample_task(topic: &str, created_at: i64) -> Task {
        Task::from_new(
            NewTask::new(topic, "0 9 * * *", "drink water").with_title("Hydrate"),
            created_at,
        )
    }

    #[test]
    fn open_seeds_schema_version() {
        let (_dir, store) = test_store();
        let version = store.schema_version().expect("schema_version");
        assert_eq!(version, Some(super::super::schema::CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn insert_and_get_round_trip() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);

        store.insert(&task).expect("insert");
        let loaded = store.get(&task.id).expect("get").expect("present");
        assert_eq!(loaded, task);
    }

    #[test]
    fn get_missing_returns_none() {
        let (_dir, store) = test_store();
        assert!(store.get("nope").expect("get").is_none());
    }

    #[test]
    fn insert_duplicate_id_is_rejected() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");
        assert!(matches!(store.insert(&task), Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn list_orders_by_created_at() {
        let (_dir, store) = test_store();
        let c = sample_task("c", 300);
        let a = sample_task("a", 100);
        let b = sample_task("b", 200);
        store.insert(&c).expect("insert c");
        store.insert(&a).expect("insert a");
        store.insert(&b).expect("insert b");

        let topics: Vec<String> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|t| t.topic)
            .collect();
        assert_eq!(topics, vec!["a", "b", "c"]);
    }

    #[test]
    fn list_enabled_filters_disabled_tasks() {
        let (_dir, store) = test_store();
        let mut off = sample_task("off", 100);
        off.enabled = false;
        let on = sample_task("on", 200);
        store.insert(&off).expect("insert off");
        store.insert(&on).expect("insert on");

        let enabled = store.list_enabled().expect("list_enabled");
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].topic, "on");
    }

    #[test]
    fn update_rewrites_row() {
        let (_dir, store) = test_store();
        let mut task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        task.message = "drink more water".to_owned();
        task.cron = "*/30 * * * *".to_owned();
        task.updated_at = 150;
        store.update(&task).expect("update");

        let loaded = store.get(&task.id).expect("get").expect("present");
        assert_eq!(loaded.message, "drink more water");
        assert_eq!(loaded.cron, "*/30 * * * *");
        assert_eq!(loaded.updated_at, 150);
        assert_eq!(loaded.created_at, 100);
    }

    #[test]
    fn update_missing_returns_not_found() {
        let (_dir, store) = test_store();
        let task = sample_task("ghost", 100);
        assert!(matches!(
            store.update(&task),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_task_and_cascades_history() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");
        store.record_fire(&task.id, 900, None).expect("record_fire");
        assert_eq!(store.history(&task.id, 10).expect("history").len(), 1);

        assert!(store.delete(&task.id).expect("delete"));
        assert!(store.get(&task.id).expect("get").is_none());
        assert!(store.history(&task.id, 10).expect("history").is_empty());
    }

    #[test]
    fn delete_missing_returns_false() {
        let (_dir, store) = test_store();
        assert!(!store.delete("nope").expect("delete"));
    }

    #[test]
    fn set_enabled_flips_flag() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        assert!(store.set_enabled(&task.id, false).expect("disable"));
        let loaded = store.get(&task.id).expect("get").expect("present");
        assert!(!loaded.enabled);

        assert!(store.set_enabled(&task.id, true).expect("enable"));
        let loaded = store.get(&task.id).expect("get").expect("present");
        assert!(loaded.enabled);
    }

    #[test]
    fn set_enabled_missing_returns_false() {
        let (_dir, store) = test_store();
        assert!(!store.set_enabled("nope", true).expect("set_enabled"));
    }

    #[test]
    fn record_fire_success_updates_counters() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        store.record_fire(&task.id, 900, None).expect("record_fire");

        let loaded = store.get(&task.id).expect("get").expect("present");
        assert_eq!(loaded.last_fired_at, Some(900));
        assert_eq!(loaded.fire_count, 1);
        assert!(loaded.last_error.is_none());

        let history = store.history(&task.id, 10).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, FireOutcome::Delivered);
        assert!(history[0].detail.is_empty());
        assert_eq!(history[0].at, 900);
    }

    #[test]
    fn record_fire_failure_sets_last_error() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        store
            .record_fire(&task.id, 900, Some("gateway returned HTTP 500"))
            .expect("record_fire");

        let loaded = store.get(&task.id).expect("get").expect("present");
        assert_eq!(loaded.fire_count, 1);
        assert_eq!(
            loaded.last_error.as_deref(),
            Some("gateway returned HTTP 500")
        );

        let history = store.history(&task.id, 10).expect("history");
        assert_eq!(history[0].outcome, FireOutcome::Failed);
        assert_eq!(history[0].detail, "gateway returned HTTP 500");
    }

    #[test]
    fn record_fire_success_clears_previous_error() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        store
            .record_fire(&task.id, 900, Some("boom"))
            .expect("failed fire");
        store.record_fire(&task.id, 960, None).expect("ok fire");

        let loaded = store.get(&task.id).expect("get").expect("present");
        assert_eq!(loaded.fire_count, 2);
        assert!(loaded.last_error.is_none());
        assert_eq!(loaded.last_fired_at, Some(960));
    }

    #[test]
    fn record_fire_on_deleted_task_is_noop() {
        let (_dir, store) = test_store();
        store
            .record_fire("already-gone", 900, None)
            .expect("record_fire");
        assert!(store.history("already-gone", 10).expect("history").is_empty());
    }

    #[test]
    fn history_is_bounded_per_task() {
        let (_dir, store) = test_store();
        let store = store.with_history_limit(3);
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        for i in 0..5 {
            store
                .record_fire(&task.id, 900 + i, None)
                .expect("record_fire");
        }

        let history = store.history(&task.id, 10).expect("history");
        assert_eq!(history.len(), 3);
        // Newest attempts survive pruning.
        assert_eq!(history[0].at, 904);
        assert_eq!(history[2].at, 902);
    }

    #[test]
    fn history_is_newest_first() {
        let (_dir, store) = test_store();
        let task = sample_task("water", 100);
        store.insert(&task).expect("insert");

        store.record_fire(&task.id, 100, None).expect("fire 1");
        store.record_fire(&task.id, 200, Some("oops")).expect("fire 2");

        let history = store.history(&task.id, 10).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].at, 200);
        assert_eq!(history[1].at, 100);
    }

    #[test]
    fn reopen_preserves_tasks() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let task = sample_task("water", 100);
        {
            let store = TaskStore::open(dir.path()).expect("open");
            store.insert(&task).expect("insert");
        }

        let store = TaskStore::open(dir.path()).expect("reopen");
        let loaded = store.get(&task.id).expect("get").expect("present");
        assert_eq!(loaded, task);
    }
}
