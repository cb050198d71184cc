//! Worker state — identity, specialization, busy tracking, rolling metric.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PoolError;

/// Capability tag determining which task types a worker may accept.
/// Fixed at creation; never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Specialization {
    CodeFixer,
    FeatureGenerator,
    SecurityAuditor,
    PerformanceTuner,
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CodeFixer => "CodeFixer",
            Self::FeatureGenerator => "FeatureGenerator",
            Self::SecurityAuditor => "SecurityAuditor",
            Self::PerformanceTuner => "PerformanceTuner",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Specialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CodeFixer" => Ok(Self::CodeFixer),
            "FeatureGenerator" => Ok(Self::FeatureGenerator),
            "SecurityAuditor" => Ok(Self::SecurityAuditor),
            "PerformanceTuner" => Ok(Self::PerformanceTuner),
            other => Err(format!("unknown specialization: {other}")),
        }
    }
}

/// Stable worker identifier, assigned at pool initialization and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Id for the `n`-th worker created at pool initialization.
    pub(crate) fn indexed(n: usize) -> Self {
        Self(format!("worker-{n:03}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A pool member capable of executing tasks matching its specialization.
///
/// Busy state is derived: a worker is busy exactly while `current_task` is
/// set, so the busy/current-task invariant cannot drift. All mutation goes
/// through [`reserve`](Worker::reserve) and [`release`](Worker::release).
#[derive(Debug, Clone)]
pub struct Worker {
    id: WorkerId,
    specialization: Specialization,
    current_task: Option<Uuid>,
    avg_completion_ms: f64,
    completed_count: u64,
    last_seen: DateTime<Utc>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, specialization: Specialization, baseline_avg_ms: u64) -> Self {
        Self {
            id,
            specialization,
            current_task: None,
            avg_completion_ms: baseline_avg_ms as f64,
            completed_count: 0,
            last_seen: Utc::now(),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn specialization(&self) -> Specialization {
        self.specialization
    }

    /// True exactly while a task is in flight on this worker.
    pub fn busy(&self) -> bool {
        self.current_task.is_some()
    }

    pub fn current_task(&self) -> Option<Uuid> {
        self.current_task
    }

    /// Cumulative mean of completion durations, seeded to the configured
    /// baseline until the first successful completion.
    pub fn avg_completion_ms(&self) -> f64 {
        self.avg_completion_ms
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    /// Transition idle → busy with the given task.
    pub(crate) fn reserve(&mut self, task_id: Uuid) -> Result<(), PoolError> {
        if let Some(current) = self.current_task {
            return Err(PoolError::AlreadyBusy {
                id: self.id.clone(),
                current,
                requested: task_id,
            });
        }
        self.current_task = Some(task_id);
        self.last_seen = Utc::now();
        Ok(())
    }

    /// Transition busy → idle. On success the completion feeds the rolling
    /// average; on failure the metric is left untouched. Returns the task id
    /// the worker was busy with.
    pub(crate) fn release(&mut self, completion_ms: u64, success: bool) -> Result<Uuid, PoolError> {
        let task_id = self.current_task.take().ok_or_else(|| PoolError::NotBusy {
            id: self.id.clone(),
        })?;
        if success {
            self.completed_count += 1;
            let n = self.completed_count as f64;
            self.avg_completion_ms =
                ((self.avg_completion_ms * (n - 1.0)) + completion_ms as f64) / n;
        }
        self.last_seen = Utc::now();
        Ok(task_id)
    }

    /// Immutable copy of this worker's state for reporting.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            specialization: self.specialization,
            busy: self.busy(),
            current_task: self.current_task,
            avg_completion_ms: self.avg_completion_ms,
            completed_count: self.completed_count,
            last_seen: self.last_seen,
        }
    }
}

/// Point-in-time copy of a worker's state, safe to hand out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub specialization: Specialization,
    pub busy: bool,
    pub current_task: Option<Uuid>,
    pub avg_completion_ms: f64,
    pub completed_count: u64,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_worker() -> Worker {
        Worker::new(WorkerId::indexed(1), Specialization::CodeFixer, 500)
    }

    #[test]
    fn new_worker_is_idle_at_baseline() {
        let w = make_worker();
        assert!(!w.busy());
        assert_eq!(w.current_task(), None);
        assert_eq!(w.avg_completion_ms(), 500.0);
        assert_eq!(w.completed_count(), 0);
    }

    #[test]
    fn reserve_sets_current_task() {
        let mut w = make_worker();
        let task = Uuid::new_v4();
        w.reserve(task).unwrap();
        assert!(w.busy());
        assert_eq!(w.current_task(), Some(task));
    }

    #[test]
    fn reserve_busy_worker_fails() {
        let mut w = make_worker();
        w.reserve(Uuid::new_v4()).unwrap();
        let err = w.reserve(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PoolError::AlreadyBusy { .. }));
    }

    #[test]
    fn release_idle_worker_fails() {
        let mut w = make_worker();
        let err = w.release(100, true).unwrap_err();
        assert!(matches!(err, PoolError::NotBusy { .. }));
    }

    #[test]
    fn successful_release_updates_cumulative_mean() {
        let mut w = make_worker();
        for duration in [400, 600, 800] {
            w.reserve(Uuid::new_v4()).unwrap();
            w.release(duration, true).unwrap();
        }
        // Baseline is dropped on the first completion; the metric is the
        // exact mean of recorded durations.
        assert_eq!(w.avg_completion_ms(), 600.0);
        assert_eq!(w.completed_count(), 3);
    }

    #[test]
    fn failed_release_leaves_metric_unchanged() {
        let mut w = make_worker();
        w.reserve(Uuid::new_v4()).unwrap();
        w.release(9999, false).unwrap();
        assert!(!w.busy());
        assert_eq!(w.avg_completion_ms(), 500.0);
        assert_eq!(w.completed_count(), 0);
    }

    #[test]
    fn release_returns_the_in_flight_task() {
        let mut w = make_worker();
        let task = Uuid::new_v4();
        w.reserve(task).unwrap();
        assert_eq!(w.release(250, true).unwrap(), task);
        assert_eq!(w.current_task(), None);
    }

    #[test]
    fn specialization_parse_roundtrip() {
        for s in [
            Specialization::CodeFixer,
            Specialization::FeatureGenerator,
            Specialization::SecurityAuditor,
            Specialization::PerformanceTuner,
        ] {
            assert_eq!(s.to_string().parse::<Specialization>().unwrap(), s);
        }
        assert!("Wizard".parse::<Specialization>().is_err());
    }
}
