//! Error types for agent-dispatch.

use uuid::Uuid;

use crate::pool::WorkerId;

/// Top-level error type for the dispatch service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Pool size must be positive")]
    EmptyPool,

    #[error("Specialization band for {specialization} must be positive")]
    EmptyBand { specialization: String },

    #[error("Specialization bands cover {covered} workers but the pool size is {size}")]
    BandMismatch { covered: usize, size: usize },
}

/// Worker-pool state errors. Reservation races are recovered locally by the
/// dispatcher and never surface to callers.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker {id} is not part of this pool")]
    UnknownWorker { id: WorkerId },

    #[error("Worker {id} is already busy with task {current}, cannot reserve for {requested}")]
    AlreadyBusy {
        id: WorkerId,
        current: Uuid,
        requested: Uuid,
    },

    #[error("Worker {id} is idle, nothing to release")]
    NotBusy { id: WorkerId },
}

/// Task-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Executor failures. Observable only through the task's FAILED status and
/// the completion event; never returned from `submit`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Execution of task {task_id} failed: {reason}")]
    Failed { task_id: Uuid, reason: String },

    #[error("Executor rejected task {task_id}: {reason}")]
    Rejected { task_id: Uuid, reason: String },
}

/// Result type alias for the dispatch service.
pub type Result<T> = std::result::Result<T, Error>;
