//! Pester: cron-driven personal reminder scheduler.
//!
//! Stores reminder tasks in SQLite, computes their fire times from
//! five-field cron expressions, and delivers each fire as an HTTP POST
//! to an ntfy-compatible push gateway.
//!
//! # Architecture
//!
//! One background dispatch loop owns all live scheduling state:
//! - **Store**: durable task records and fire history via `rusqlite`
//! - **Cron**: pure next-fire-time computation over a bounded horizon
//! - **Registry**: in-memory job table, rebuilt from the store on startup
//! - **Dispatcher**: a `select!` loop sleeping until the nearest deadline
//! - **Notifier**: HTTP delivery via `reqwest`; failures are logged, never fatal
//!
//! [`ReminderService`] ties these together behind a small CRUD facade.

pub mod config;
pub mod cron;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod paths;
pub mod registry;
pub mod service;
pub mod store;
pub mod task;

pub use config::{GatewayConfig, MissedFirePolicy, SchedulerConfig};
pub use cron::{CronError, CronExpr};
pub use dispatch::SchedulerHandle;
pub use error::{ReminderError, Result};
pub use notify::{Notifier, NotifyError};
pub use registry::JobSnapshot;
pub use service::ReminderService;
pub use store::{StoreError, TaskStore};
pub use task::{FireOutcome, FireRecord, NewTask, Task, TaskPatch};
