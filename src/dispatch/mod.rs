//! Dispatch engine — task model and the match-reserve-execute-release cycle.
//!
//! Core components:
//! - `task` — task types, priorities, and the status state machine
//! - `dispatcher` — worker matching, reservation, background execution

pub mod dispatcher;
pub mod task;

pub use dispatcher::{Assignment, Dispatcher, DispatcherDeps, Submission, TaskStatusView};
pub use task::{
    NewTask, TaskDetails, TaskLogEntry, TaskPriority, TaskRecord, TaskStatus, TaskType,
};
