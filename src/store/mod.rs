//! Durable reminder task storage.
//!
//! Sub-modules:
//! - `schema`: SQLite DDL definitions.
//! - `sqlite`: SQLite-backed [`TaskStore`].

pub(crate) mod schema;
pub mod sqlite;

pub use sqlite::{DEFAULT_HISTORY_LIMIT, StoreError, TaskStore};
