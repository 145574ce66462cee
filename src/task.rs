//! Reminder task records and fire history types.
//!
//! Defines the durable [`Task`] record, the [`NewTask`]/[`TaskPatch`] input
//! types used by the service layer, and the [`FireRecord`] history entry.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A user-defined reminder task.
///
/// The durable record: everything here survives restart. Runtime scheduling
/// state (the computed next fire instant) lives in the job registry and is
/// rebuilt from this record at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (UUID v4 string).
    pub id: String,
    /// Short human-readable title, sent as the notification title.
    pub title: String,
    /// Push gateway topic this task publishes to.
    pub topic: String,
    /// Notification body text.
    pub message: String,
    /// 5-field cron expression (minute hour day month weekday).
    pub cron: String,
    /// Whether the task is scheduled. Disabled tasks stay in the store
    /// but never fire.
    pub enabled: bool,
    /// Epoch seconds until which the task is snoozed, if any. Snoozing
    /// disables the task; nothing re-enables it automatically.
    pub snoozed_until: Option<i64>,
    /// Epoch seconds when the task was created.
    pub created_at: i64,
    /// Epoch seconds of the last definition change.
    pub updated_at: i64,
    /// Epoch seconds of the last dispatch attempt, if any.
    pub last_fired_at: Option<i64>,
    /// Total dispatch attempts, successful or not.
    pub fire_count: i64,
    /// Error text from the most recent dispatch, cleared on success.
    pub last_error: Option<String>,
}

impl Task {
    /// Build a fresh task record from user input at the given instant.
    ///
    /// Generates the id; `created_at` and `updated_at` are both `now`.
    pub fn from_new(new: NewTask, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            topic: new.topic,
            message: new.message,
            cron: new.cron,
            enabled: new.enabled,
            snoozed_until: None,
            created_at: now,
            updated_at: now,
            last_fired_at: None,
            fire_count: 0,
            last_error: None,
        }
    }

    /// Apply a partial update in place. Does not touch `updated_at`.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(topic) = &patch.topic {
            self.topic = topic.clone();
        }
        if let Some(message) = &patch.message {
            self.message = message.clone();
        }
        if let Some(cron) = &patch.cron {
            self.cron = cron.clone();
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        };
        write!(f, "{label} [{}] -> {}", self.cron, self.topic)
    }
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Notification title (may be empty).
    pub title: String,
    /// Push gateway topic.
    pub topic: String,
    /// Notification body text.
    pub message: String,
    /// 5-field cron expression.
    pub cron: String,
    /// Whether the task starts enabled.
    pub enabled: bool,
}

impl NewTask {
    /// Create an enabled task input with an empty title.
    pub fn new(topic: impl Into<String>, cron: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            topic: topic.into(),
            message: message.into(),
            cron: cron.into(),
            enabled: true,
        }
    }

    /// Set the notification title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Partial task update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New notification title.
    pub title: Option<String>,
    /// New gateway topic.
    pub topic: Option<String>,
    /// New notification body.
    pub message: Option<String>,
    /// New cron expression.
    pub cron: Option<String>,
    /// New enabled state.
    pub enabled: Option<bool>,
}

/// Outcome of a single dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireOutcome {
    /// Gateway accepted the notification.
    Delivered,
    /// Dispatch failed (transport error or gateway rejection).
    Failed,
}

/// One entry in a task's fire history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireRecord {
    /// History row identifier.
    pub id: String,
    /// Task this attempt belongs to.
    pub task_id: String,
    /// Whether delivery succeeded.
    pub outcome: FireOutcome,
    /// Error text for failed attempts, empty on success.
    pub detail: String,
    /// Epoch seconds of the attempt.
    pub at: i64,
}

/// Returns current UTC seconds since epoch.
pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
