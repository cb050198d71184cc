//! Task store contract — the durable record of task state transitions.
//!
//! The store never originates transitions on its own; the dispatcher is the
//! sole initiator.

use async_trait::async_trait;
use uuid::Uuid;

use crate::dispatch::task::{TaskRecord, TaskStatus};
use crate::error::StoreError;
use crate::pool::WorkerId;

/// Optional fields accompanying a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    /// Worker the task was assigned to (set on IN_PROGRESS).
    pub assigned_worker_id: Option<WorkerId>,
    /// Measured completion duration (set on COMPLETED).
    pub completion_ms: Option<u64>,
    /// Log line appended to the task's history.
    pub log: Option<String>,
}

impl TransitionFields {
    pub fn with_log(message: impl Into<String>) -> Self {
        Self {
            log: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Backend-agnostic task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    /// Insert a freshly submitted task.
    async fn insert_task(&self, task: &TaskRecord) -> Result<(), StoreError>;

    /// Record a status transition, updating any accompanying fields and
    /// appending the log line if one is given.
    async fn record_transition(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        fields: TransitionFields,
    ) -> Result<(), StoreError>;

    /// Fetch a task with its log history.
    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StoreError>;
}
