//! Executor contract — the pluggable seam between dispatch and real work.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::dispatch::task::TaskRecord;
use crate::error::ExecutionError;

/// Outcome of running one task.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionReport {
    /// Measured wall-clock duration of the work.
    pub duration_ms: u64,
    pub success: bool,
}

/// Performs the actual work for a task. Invoked once per successful
/// reservation, always off the dispatch decision path.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, task: &TaskRecord) -> Result<ExecutionReport, ExecutionError>;
}

/// Development executor: sleeps for a base duration plus random jitter and
/// reports success. Stands in for real work the same way the original
/// deployment simulated it.
pub struct SimulatedExecutor {
    base: Duration,
    jitter_ms: u64,
}

impl SimulatedExecutor {
    pub fn new(base_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            jitter_ms,
        }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn run(&self, task: &TaskRecord) -> Result<ExecutionReport, ExecutionError> {
        let started = Instant::now();
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        };
        debug!(task_id = %task.task_id, simulated_ms = self.base.as_millis() as u64 + jitter, "Simulated execution started");
        tokio::time::sleep(self.base + Duration::from_millis(jitter)).await;
        Ok(ExecutionReport {
            duration_ms: started.elapsed().as_millis() as u64,
            success: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::task::{NewTask, TaskDetails, TaskPriority, TaskType};

    fn make_task() -> TaskRecord {
        TaskRecord::new(NewTask {
            task_type: TaskType::CodeFix,
            project_path: "/app".into(),
            priority: TaskPriority::Medium,
            details: TaskDetails {
                description: "fix the build".into(),
                ..Default::default()
            },
        })
    }

    #[tokio::test]
    async fn simulated_run_reports_at_least_the_base() {
        let executor = SimulatedExecutor::new(10, 0);
        let report = executor.run(&make_task()).await.unwrap();
        assert!(report.success);
        assert!(report.duration_ms >= 10);
    }

    #[tokio::test]
    async fn zero_jitter_is_allowed() {
        let executor = SimulatedExecutor::new(0, 0);
        let report = executor.run(&make_task()).await.unwrap();
        assert!(report.success);
    }
}
