//! High-level reminder service API.
//!
//! The service owns the durable store and a handle to the dispatch
//! loop. Every mutation is validated, persisted, and then reflected in
//! the running scheduler, in that order, so the store is always the
//! source of truth on restart.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SchedulerConfig;
use crate::cron::CronExpr;
use crate::dispatch::{Dispatcher, SchedulerHandle};
use crate::error::{ReminderError, Result};
use crate::notify::Notifier;
use crate::registry::JobSnapshot;
use crate::store::TaskStore;
use crate::task::{FireRecord, NewTask, Task, TaskPatch, now_epoch_secs};

/// Facade over the store and the running dispatch loop.
pub struct ReminderService {
    store: Arc<TaskStore>,
    handle: SchedulerHandle,
    tz: FixedOffset,
}

impl ReminderService {
    /// Open the store, start the dispatch loop, and return the service
    /// together with the loop's join handle.
    ///
    /// Must be called from within a tokio runtime. Dropping the service
    /// (and every [`SchedulerHandle`] clone) stops the loop.
    pub fn start(config: &SchedulerConfig) -> Result<(Self, JoinHandle<()>)> {
        let tz = config.parsed_timezone()?;
        let store = Arc::new(
            TaskStore::open(&config.data_root())?.with_history_limit(config.history_limit),
        );
        let notifier = Arc::new(Notifier::new(&config.gateway)?);
        let (dispatcher, handle) =
            Dispatcher::new(Arc::clone(&store), notifier, tz, config.missed_fires);
        let join = tokio::spawn(dispatcher.run());
        Ok((Self { store, handle, tz }, join))
    }

    /// Create a task; when enabled, it is scheduled immediately.
    ///
    /// The topic and cron expression are validated, and the schedule must
    /// have at least one future fire time, before anything is persisted.
    pub fn create(&self, new: NewTask) -> Result<Task> {
        validate_topic(&new.topic)?;
        let cron = CronExpr::parse(&new.cron)?;
        cron.next_after(&self.now())?;

        let task = Task::from_new(new, now_epoch_secs());
        self.store.insert(&task)?;
        if task.enabled {
            self.handle.schedule(task.clone())?;
        }
        info!(task = %task.id, topic = %task.topic, "task created");
        Ok(task)
    }

    /// Apply a partial update; scheduling follows the new state.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut task = self
            .store
            .get(id)?
            .ok_or_else(|| ReminderError::NotFound(id.to_owned()))?;
        task.apply(&patch);
        validate_topic(&task.topic)?;
        let cron = CronExpr::parse(&task.cron)?;
        cron.next_after(&self.now())?;

        // A task cannot be both enabled and snoozed.
        if task.enabled {
            task.snoozed_until = None;
        }
        task.updated_at = now_epoch_secs();

        self.store.update(&task)?;
        if task.enabled {
            self.handle.schedule(task.clone())?;
        } else {
            self.handle.cancel(&task.id)?;
        }
        info!(task = %task.id, enabled = task.enabled, "task updated");
        Ok(task)
    }

    /// Delete a task and its fire history; any scheduled job is cancelled.
    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.store.delete(id)? {
            return Err(ReminderError::NotFound(id.to_owned()));
        }
        self.handle.cancel(id)?;
        info!(task = %id, "task deleted");
        Ok(())
    }

    /// Fetch one task.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.store
            .get(id)?
            .ok_or_else(|| ReminderError::NotFound(id.to_owned()))
    }

    /// List all tasks, oldest first.
    pub fn list(&self) -> Result<Vec<Task>> {
        Ok(self.store.list()?)
    }

    /// Enable a task; its next fire time is computed from now.
    pub fn enable(&self, id: &str) -> Result<Task> {
        self.update(
            id,
            TaskPatch {
                enabled: Some(true),
                ..TaskPatch::default()
            },
        )
    }

    /// Disable a task and cancel its scheduled job.
    pub fn disable(&self, id: &str) -> Result<Task> {
        self.update(
            id,
            TaskPatch {
                enabled: Some(false),
                ..TaskPatch::default()
            },
        )
    }

    /// Pause a task for `hours`, recording when it may come back.
    pub fn snooze(&self, id: &str, hours: u32) -> Result<Task> {
        let mut task = self
            .store
            .get(id)?
            .ok_or_else(|| ReminderError::NotFound(id.to_owned()))?;
        let now = now_epoch_secs();
        task.enabled = false;
        task.snoozed_until = Some(now + i64::from(hours) * 3600);
        task.updated_at = now;

        self.store.update(&task)?;
        self.handle.cancel(id)?;
        info!(task = %id, hours, "task snoozed");
        Ok(task)
    }

    /// Clear any snooze and re-enable; scheduling restarts from now.
    pub fn reactivate(&self, id: &str) -> Result<Task> {
        self.enable(id)
    }

    /// Fetch a task's fire history, newest first.
    ///
    /// Unknown ids are an error rather than an empty list.
    pub fn history(&self, id: &str, limit: usize) -> Result<Vec<FireRecord>> {
        self.get(id)?;
        Ok(self.store.history(id, limit)?)
    }

    /// Snapshot of the live scheduled jobs.
    pub async fn jobs(&self) -> Result<Vec<JobSnapshot>> {
        self.handle.jobs().await
    }

    /// Clone of the handle for reaching the dispatch loop directly.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// Topics become URL path segments; restrict them to a safe alphabet.
fn validate_topic(topic: &str) -> Result<()> {
    let valid = !topic.is_empty()
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ReminderError::InvalidTopic(topic.to_owned()))
    }
}
