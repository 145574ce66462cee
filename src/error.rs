//! Error types for the reminder scheduler.

use crate::cron::CronError;
use crate::notify::NotifyError;
use crate::store::StoreError;

/// Top-level error type for the reminder scheduling system.
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    /// Cron expression rejected or has no future occurrence.
    #[error("cron error: {0}")]
    Cron(#[from] CronError),

    /// Task store read/write error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Push gateway client error.
    #[error("notify error: {0}")]
    Notify(#[from] NotifyError),

    /// No task with the given id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Topic is empty or contains characters invalid in a URL path segment.
    #[error("invalid topic {0:?}: topics are limited to letters, digits, '-' and '_'")]
    InvalidTopic(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler loop unavailable (command channel closed).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ReminderError>;
