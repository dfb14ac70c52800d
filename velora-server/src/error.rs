//! Server-side error taxonomy
//!
//! The rule for the ingestion path: no single malformed, duplicate or
//! unpersistable event may ever stop a feed. Errors here either describe a
//! failure scoped to one event (logged, counted, dropped) or a feed-level
//! condition the orchestrator reacts to (socket loss, shutdown).

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),

    #[error("Storage operation failed")]
    Storage(#[from] StorageError),

    #[error("Invalid fine schedule: {0}")]
    Schedule(#[from] velora_core::ScheduleError),

    #[error("Cannot read configuration file: {0}")]
    Config(String),

    #[error("Shutdown")]
    Shutdown,
}
