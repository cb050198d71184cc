//! Dispatcher — orchestrates the match-reserve-execute-release cycle.
//!
//! The dispatcher is the only component callers invoke, the sole mutator of
//! worker busy/metric state, and the sole initiator of task status
//! transitions. Execution always runs out-of-band: `submit` returns once the
//! assignment decision is made.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, PoolError, Result, StoreError};
use crate::events::{DispatchEvent, EventHub};
use crate::executor::Executor;
use crate::pool::{WorkerId, WorkerPool, WorkerSnapshot};
use crate::router::SpecializationRouter;
use crate::store::{TaskStore, TransitionFields};

use super::task::{NewTask, TaskRecord, TaskStatus};

/// Conservative wait estimate reported for diverted tasks.
const DIVERSION_ESTIMATE: &str = "30s (fallback queue)";

/// Dependencies for the dispatcher.
pub struct DispatcherDeps {
    pub pool: Arc<WorkerPool>,
    pub router: SpecializationRouter,
    pub store: Arc<dyn TaskStore>,
    pub executor: Arc<dyn Executor>,
    pub events: EventHub,
}

/// Outcome of a submission: a direct assignment, or a diversion when no
/// eligible worker was idle. Submission never blocks and never errors for
/// unavailability.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Assignment {
    Assigned {
        worker_id: WorkerId,
        estimated_completion: String,
    },
    Diverted {
        estimated_completion: String,
    },
}

impl Assignment {
    pub fn assigned_to(&self) -> Option<&WorkerId> {
        match self {
            Self::Assigned { worker_id, .. } => Some(worker_id),
            Self::Diverted { .. } => None,
        }
    }

    pub fn estimated_completion(&self) -> &str {
        match self {
            Self::Assigned {
                estimated_completion,
                ..
            }
            | Self::Diverted {
                estimated_completion,
            } => estimated_completion,
        }
    }
}

/// Result of [`Dispatcher::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub task_id: Uuid,
    #[serde(flatten)]
    pub assignment: Assignment,
}

/// Stored task state joined with the assigned worker's current snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub task: TaskRecord,
    pub worker_performance: Option<WorkerSnapshot>,
}

/// The dispatch engine.
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    router: SpecializationRouter,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn Executor>,
    events: EventHub,
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps) -> Self {
        Self {
            pool: deps.pool,
            router: deps.router,
            store: deps.store,
            executor: deps.executor,
            events: deps.events,
        }
    }

    /// Submit a task for dispatch.
    ///
    /// Persists the task, routes it to the required specialization, and
    /// tries to reserve the best idle worker. A reservation lost to a
    /// concurrent submission is retried once; after that the task is
    /// diverted. On assignment, execution is launched in the background and
    /// the call returns immediately.
    pub async fn submit(&self, new_task: NewTask) -> Result<Submission> {
        let task = TaskRecord::new(new_task);
        let task_id = task.task_id;
        self.store.insert_task(&task).await?;

        let specialization = self.router.route(task.task_type);

        let mut reserved = None;
        for attempt in 0..2 {
            let Some(candidate) = self.pool.find_best_idle(specialization).await else {
                break;
            };
            match self.pool.reserve(&candidate.id, task_id).await {
                Ok(()) => {
                    reserved = Some(candidate);
                    break;
                }
                Err(PoolError::AlreadyBusy { .. }) => {
                    debug!(
                        task_id = %task_id,
                        worker_id = %candidate.id,
                        attempt,
                        "Lost reservation race"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(worker) = reserved else {
            warn!(task_id = %task_id, %specialization, "No idle worker available, diverting");
            self.store
                .record_transition(
                    task_id,
                    TaskStatus::Queued,
                    TransitionFields::with_log(format!(
                        "No idle {specialization} worker, diverted to fallback queue"
                    )),
                )
                .await?;
            self.events.publish(DispatchEvent::TaskDiverted {
                task_id,
                specialization,
            });
            return Ok(Submission {
                task_id,
                assignment: Assignment::Diverted {
                    estimated_completion: DIVERSION_ESTIMATE.to_string(),
                },
            });
        };

        if let Err(e) = self
            .store
            .record_transition(
                task_id,
                TaskStatus::InProgress,
                TransitionFields {
                    assigned_worker_id: Some(worker.id.clone()),
                    completion_ms: None,
                    log: Some(format!("Assigned to {}", worker.id)),
                },
            )
            .await
        {
            // Roll the reservation back so the worker cannot leak busy.
            if let Err(release_err) = self.pool.release(&worker.id, 0, false).await {
                error!(
                    worker_id = %worker.id,
                    error = %release_err,
                    "Failed to roll back reservation"
                );
            }
            return Err(e.into());
        }

        info!(
            task_id = %task_id,
            worker_id = %worker.id,
            %specialization,
            "Task assigned"
        );
        self.events.publish(DispatchEvent::TaskAssigned {
            task_id,
            worker_id: worker.id.clone(),
            specialization,
        });

        let estimated_completion = estimate_seconds(worker.avg_completion_ms);
        self.spawn_execution(task, worker.id.clone());

        Ok(Submission {
            task_id,
            assignment: Assignment::Assigned {
                worker_id: worker.id,
                estimated_completion,
            },
        })
    }

    /// Look up a task's stored state joined with its worker's current
    /// performance snapshot.
    pub async fn status_of(&self, task_id: Uuid) -> Result<TaskStatusView> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(Error::Store(StoreError::TaskNotFound { id: task_id }))?;

        let worker_performance = match &task.assigned_worker_id {
            Some(id) => self.pool.performance_of(id).await,
            None => None,
        };

        Ok(TaskStatusView {
            task,
            worker_performance,
        })
    }

    /// Snapshot of every worker, in id order.
    pub async fn worker_statuses(&self) -> Vec<WorkerSnapshot> {
        self.pool.snapshot().await
    }

    /// Subscribe to dispatch lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Run the executor off the dispatch path, then apply the completion:
    /// release the worker (always), persist the terminal status, and emit
    /// the completion event.
    fn spawn_execution(&self, task: TaskRecord, worker_id: WorkerId) {
        let pool = Arc::clone(&self.pool);
        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let events = self.events.clone();

        tokio::spawn(async move {
            let task_id = task.task_id;
            let started = Instant::now();

            let (duration_ms, success) = match executor.run(&task).await {
                Ok(report) => (report.duration_ms, report.success),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Executor failed");
                    (started.elapsed().as_millis() as u64, false)
                }
            };

            // The worker goes idle whatever the outcome; a busy worker must
            // never outlive its task.
            if let Err(e) = pool.release(&worker_id, duration_ms, success).await {
                error!(
                    worker_id = %worker_id,
                    task_id = %task_id,
                    error = %e,
                    "Failed to release worker"
                );
            }

            let status = if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            let fields = if success {
                TransitionFields {
                    completion_ms: Some(duration_ms),
                    log: Some(format!("Task completed successfully in {duration_ms}ms")),
                    ..Default::default()
                }
            } else {
                TransitionFields::with_log(format!("Task failed after {duration_ms}ms"))
            };
            if let Err(e) = store.record_transition(task_id, status, fields).await {
                warn!(task_id = %task_id, error = %e, "Failed to persist task completion");
            }

            info!(
                task_id = %task_id,
                worker_id = %worker_id,
                %status,
                duration_ms,
                "Task finished"
            );
            events.publish(DispatchEvent::TaskCompleted {
                task_id,
                worker_id,
                status,
                duration_ms,
            });
        });
    }
}

/// Wait estimate derived from a rolling average, rounded up to whole seconds.
fn estimate_seconds(avg_completion_ms: f64) -> String {
    format!("{}s", (avg_completion_ms / 1000.0).ceil() as u64)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    use super::*;
    use crate::config::PoolConfig;
    use crate::dispatch::task::{TaskDetails, TaskPriority, TaskType};
    use crate::error::ExecutionError;
    use crate::executor::ExecutionReport;
    use crate::pool::Specialization;
    use crate::store::LibSqlTaskStore;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Executor that finishes instantly with a fixed report.
    struct InstantExecutor {
        duration_ms: u64,
        success: bool,
    }

    #[async_trait]
    impl Executor for InstantExecutor {
        async fn run(&self, _task: &TaskRecord) -> std::result::Result<ExecutionReport, ExecutionError> {
            Ok(ExecutionReport {
                duration_ms: self.duration_ms,
                success: self.success,
            })
        }
    }

    /// Executor that errors outright.
    struct BrokenExecutor;

    #[async_trait]
    impl Executor for BrokenExecutor {
        async fn run(&self, task: &TaskRecord) -> std::result::Result<ExecutionReport, ExecutionError> {
            Err(ExecutionError::Failed {
                task_id: task.task_id,
                reason: "boom".into(),
            })
        }
    }

    /// Executor that holds each task until a permit is added, so tests can
    /// keep workers busy deterministically.
    struct GatedExecutor {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Executor for GatedExecutor {
        async fn run(&self, task: &TaskRecord) -> std::result::Result<ExecutionReport, ExecutionError> {
            let permit = self.gate.acquire().await.map_err(|_| ExecutionError::Rejected {
                task_id: task.task_id,
                reason: "gate closed".into(),
            })?;
            permit.forget();
            Ok(ExecutionReport {
                duration_ms: 250,
                success: true,
            })
        }
    }

    async fn make_dispatcher(executor: Arc<dyn Executor>) -> Dispatcher {
        let pool = WorkerPool::new(&PoolConfig {
            size: 4,
            bands: vec![
                (Specialization::CodeFixer, 2),
                (Specialization::FeatureGenerator, 2),
            ],
            baseline_avg_ms: 500,
        })
        .unwrap();
        let store = LibSqlTaskStore::new_memory().await.unwrap();

        Dispatcher::new(DispatcherDeps {
            pool: Arc::new(pool),
            router: SpecializationRouter::standard(),
            store: Arc::new(store),
            executor,
            events: EventHub::new(),
        })
    }

    fn code_fix_task(description: &str) -> NewTask {
        NewTask {
            task_type: TaskType::CodeFix,
            project_path: "/app".into(),
            priority: TaskPriority::Medium,
            details: TaskDetails {
                description: description.into(),
                ..Default::default()
            },
        }
    }

    /// Wait for a TaskCompleted event for the given task.
    async fn wait_for_completion(
        rx: &mut broadcast::Receiver<DispatchEvent>,
        task_id: Uuid,
    ) -> (TaskStatus, u64) {
        timeout(TEST_TIMEOUT, async {
            loop {
                if let DispatchEvent::TaskCompleted {
                    task_id: got,
                    status,
                    duration_ms,
                    ..
                } = rx.recv().await.unwrap()
                {
                    if got == task_id {
                        return (status, duration_ms);
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for completion event")
    }

    #[tokio::test]
    async fn band_exhaustion_diverts_the_third_task() {
        let gate = Arc::new(Semaphore::new(0));
        let dispatcher = make_dispatcher(Arc::new(GatedExecutor {
            gate: Arc::clone(&gate),
        }))
        .await;
        let mut rx = dispatcher.subscribe();

        let first = dispatcher.submit(code_fix_task("first")).await.unwrap();
        let second = dispatcher.submit(code_fix_task("second")).await.unwrap();
        let third = dispatcher.submit(code_fix_task("third")).await.unwrap();

        let first_worker = first.assignment.assigned_to().expect("first assigned").clone();
        let second_worker = second.assignment.assigned_to().expect("second assigned").clone();
        assert_ne!(first_worker, second_worker);

        // Both CodeFixer workers are busy; the third submission diverts.
        assert!(third.assignment.assigned_to().is_none());
        assert_eq!(third.assignment.estimated_completion(), "30s (fallback queue)");

        let diverted = dispatcher.status_of(third.task_id).await.unwrap();
        assert_eq!(diverted.task.status, TaskStatus::Queued);

        // Let the two in-flight tasks finish and drain their events.
        gate.add_permits(2);
        wait_for_completion(&mut rx, first.task_id).await;
        wait_for_completion(&mut rx, second.task_id).await;

        let statuses = dispatcher.worker_statuses().await;
        assert!(statuses.iter().all(|w| !w.busy));
    }

    #[tokio::test]
    async fn completion_updates_store_metric_and_frees_worker() {
        let dispatcher = make_dispatcher(Arc::new(InstantExecutor {
            duration_ms: 250,
            success: true,
        }))
        .await;
        let mut rx = dispatcher.subscribe();

        let submission = dispatcher.submit(code_fix_task("quick fix")).await.unwrap();
        let worker_id = submission.assignment.assigned_to().unwrap().clone();
        assert_eq!(submission.assignment.estimated_completion(), "1s");

        let (status, duration_ms) = wait_for_completion(&mut rx, submission.task_id).await;
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(duration_ms, 250);

        let view = dispatcher.status_of(submission.task_id).await.unwrap();
        assert_eq!(view.task.status, TaskStatus::Completed);
        assert_eq!(view.task.completion_ms, Some(250));
        assert_eq!(view.task.assigned_worker_id, Some(worker_id.clone()));

        let performance = view.worker_performance.unwrap();
        assert_eq!(performance.id, worker_id);
        assert!(!performance.busy);
        assert_eq!(performance.avg_completion_ms, 250.0);
        assert_eq!(performance.completed_count, 1);
    }

    #[tokio::test]
    async fn failed_execution_releases_worker_without_touching_metric() {
        let dispatcher = make_dispatcher(Arc::new(BrokenExecutor)).await;
        let mut rx = dispatcher.subscribe();

        let submission = dispatcher.submit(code_fix_task("doomed")).await.unwrap();
        let worker_id = submission.assignment.assigned_to().unwrap().clone();

        let (status, _) = wait_for_completion(&mut rx, submission.task_id).await;
        assert_eq!(status, TaskStatus::Failed);

        let view = dispatcher.status_of(submission.task_id).await.unwrap();
        assert_eq!(view.task.status, TaskStatus::Failed);
        assert_eq!(view.task.completion_ms, None);

        // Worker is idle, baseline metric untouched, immediately eligible.
        let performance = view.worker_performance.unwrap();
        assert_eq!(performance.id, worker_id);
        assert!(!performance.busy);
        assert_eq!(performance.avg_completion_ms, 500.0);
        assert_eq!(performance.completed_count, 0);

        let next = dispatcher.submit(code_fix_task("retry")).await.unwrap();
        assert!(next.assignment.assigned_to().is_some());
    }

    #[tokio::test]
    async fn status_of_unknown_task_is_not_found() {
        let dispatcher = make_dispatcher(Arc::new(InstantExecutor {
            duration_ms: 1,
            success: true,
        }))
        .await;

        let err = dispatcher.status_of(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn assigned_and_completed_events_are_published() {
        let dispatcher = make_dispatcher(Arc::new(InstantExecutor {
            duration_ms: 42,
            success: true,
        }))
        .await;
        let mut rx = dispatcher.subscribe();

        let submission = dispatcher.submit(code_fix_task("observable")).await.unwrap();

        let assigned = timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        match assigned {
            DispatchEvent::TaskAssigned {
                task_id,
                specialization,
                ..
            } => {
                assert_eq!(task_id, submission.task_id);
                assert_eq!(specialization, Specialization::CodeFixer);
            }
            other => panic!("expected TaskAssigned, got {other:?}"),
        }

        let (status, duration_ms) = wait_for_completion(&mut rx, submission.task_id).await;
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(duration_ms, 42);
    }

    #[tokio::test]
    async fn submission_serializes_with_flattened_outcome() {
        let submission = Submission {
            task_id: Uuid::new_v4(),
            assignment: Assignment::Diverted {
                estimated_completion: DIVERSION_ESTIMATE.to_string(),
            },
        };
        let json = serde_json::to_value(&submission).unwrap();
        assert_eq!(json["outcome"], "diverted");
        assert_eq!(json["estimated_completion"], DIVERSION_ESTIMATE);
    }
}
