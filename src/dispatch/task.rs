//! Task model and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pool::WorkerId;

/// Kind of work a task asks for. Closed set; routing to a specialization is
/// the [`crate::router::SpecializationRouter`]'s job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    CodeFix,
    FeatureGenerate,
    HealthCheck,
    SecurityScan,
    DependencyResolve,
    SystemUpdate,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CodeFix => "CODE_FIX",
            Self::FeatureGenerate => "FEATURE_GENERATE",
            Self::HealthCheck => "HEALTH_CHECK",
            Self::SecurityScan => "SECURITY_SCAN",
            Self::DependencyResolve => "DEPENDENCY_RESOLVE",
            Self::SystemUpdate => "SYSTEM_UPDATE",
        };
        write!(f, "{s}")
    }
}

/// Reporting metadata only: priority does not influence worker selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        };
        write!(f, "{s}")
    }
}

/// Status of a task.
///
/// `Queued` is both the initial state and the terminal state of a diverted
/// task (no eligible worker was idle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Queued, InProgress) | (InProgress, Completed) | (InProgress, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Caller-supplied description of the work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// One line of a task's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A task as submitted by a caller.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub task_type: TaskType,
    pub project_path: String,
    #[serde(default)]
    pub priority: TaskPriority,
    pub details: TaskDetails,
}

/// The durable record of a task, as held by the task store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub project_path: String,
    pub details: TaskDetails,
    pub assigned_worker_id: Option<WorkerId>,
    pub completion_ms: Option<u64>,
    pub logs: Vec<TaskLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a fresh QUEUED record with a system-assigned id.
    pub fn new(new_task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            task_type: new_task.task_type,
            priority: new_task.priority,
            status: TaskStatus::Queued,
            project_path: new_task.project_path,
            details: new_task.details,
            assigned_worker_id: None,
            completion_ms: None,
            logs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
