//! Fixed-capacity worker registry.
//!
//! The pool is the single source of truth for busy/idle state and the
//! rolling performance metric. The worker list is mutated exclusively
//! through `reserve`/`release`; a release is fully applied under the write
//! lock before the worker can be offered as idle again.

use std::cmp::Ordering;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{ConfigError, PoolError};

use super::worker::{Specialization, Worker, WorkerId, WorkerSnapshot};

/// Registry of all workers, created once at initialization and alive for the
/// process lifetime.
#[derive(Debug)]
pub struct WorkerPool {
    workers: RwLock<Vec<Worker>>,
}

impl WorkerPool {
    /// Create the pool from configuration: `size` workers partitioned into
    /// specialization bands, in band order.
    pub fn new(config: &PoolConfig) -> Result<Self, ConfigError> {
        if config.size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        for (specialization, count) in &config.bands {
            if *count == 0 {
                return Err(ConfigError::EmptyBand {
                    specialization: specialization.to_string(),
                });
            }
        }
        let covered: usize = config.bands.iter().map(|(_, count)| count).sum();
        if covered != config.size {
            return Err(ConfigError::BandMismatch {
                covered,
                size: config.size,
            });
        }

        let mut workers = Vec::with_capacity(config.size);
        let mut next_index = 1usize;
        for (specialization, count) in &config.bands {
            for _ in 0..*count {
                workers.push(Worker::new(
                    WorkerId::indexed(next_index),
                    *specialization,
                    config.baseline_avg_ms,
                ));
                next_index += 1;
            }
        }

        info!(
            size = config.size,
            bands = config.bands.len(),
            baseline_avg_ms = config.baseline_avg_ms,
            "Worker pool initialized"
        );

        Ok(Self {
            workers: RwLock::new(workers),
        })
    }

    /// Find the idle worker with the given specialization having the lowest
    /// rolling average, ties broken by lowest id. Read-only; callers must
    /// separately [`reserve`](WorkerPool::reserve) the worker and handle the
    /// reservation racing with another dispatch attempt.
    pub async fn find_best_idle(&self, specialization: Specialization) -> Option<WorkerSnapshot> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.busy() && w.specialization() == specialization)
            .min_by(|(ia, a), (ib, b)| {
                a.avg_completion_ms()
                    .partial_cmp(&b.avg_completion_ms())
                    .unwrap_or(Ordering::Equal)
                    .then(ia.cmp(ib))
            })
            .map(|(_, w)| w.snapshot())
    }

    /// Atomically transition a worker from idle to busy with the given task.
    pub async fn reserve(&self, id: &WorkerId, task_id: Uuid) -> Result<(), PoolError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .iter_mut()
            .find(|w| w.id() == id)
            .ok_or_else(|| PoolError::UnknownWorker { id: id.clone() })?;
        worker.reserve(task_id)?;
        debug!(worker_id = %id, task_id = %task_id, "Worker reserved");
        Ok(())
    }

    /// Transition a worker back to idle. On success the completion duration
    /// feeds the worker's cumulative mean; on failure the metric is left
    /// unchanged.
    pub async fn release(
        &self,
        id: &WorkerId,
        completion_ms: u64,
        success: bool,
    ) -> Result<(), PoolError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .iter_mut()
            .find(|w| w.id() == id)
            .ok_or_else(|| PoolError::UnknownWorker { id: id.clone() })?;
        let task_id = worker.release(completion_ms, success)?;
        debug!(
            worker_id = %id,
            task_id = %task_id,
            completion_ms,
            success,
            avg_completion_ms = worker.avg_completion_ms(),
            "Worker released"
        );
        Ok(())
    }

    /// Immutable copies of all worker states, in id order.
    pub async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let workers = self.workers.read().await;
        workers.iter().map(Worker::snapshot).collect()
    }

    /// Current snapshot of a single worker.
    pub async fn performance_of(&self, id: &WorkerId) -> Option<WorkerSnapshot> {
        let workers = self.workers.read().await;
        workers.iter().find(|w| w.id() == id).map(Worker::snapshot)
    }

    /// Number of workers in the pool.
    pub async fn size(&self) -> usize {
        self.workers.read().await.len()
    }
}
