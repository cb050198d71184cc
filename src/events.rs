//! Lifecycle event hub — broadcast fan-out to WebSocket observers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dispatch::task::TaskStatus;
use crate::pool::{Specialization, WorkerId, WorkerSnapshot};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Dispatch lifecycle events, as delivered to connected observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A task was matched to a worker and execution started.
    TaskAssigned {
        task_id: Uuid,
        worker_id: WorkerId,
        specialization: Specialization,
    },
    /// No eligible worker was idle; the task stays queued for external handling.
    TaskDiverted {
        task_id: Uuid,
        specialization: Specialization,
    },
    /// Execution finished; `status` is COMPLETED or FAILED.
    TaskCompleted {
        task_id: Uuid,
        worker_id: WorkerId,
        status: TaskStatus,
        duration_ms: u64,
    },
    /// Periodic pool snapshot push.
    PoolHealth { workers: Vec<WorkerSnapshot> },
    /// Full pool sync (sent on WS connect and after broadcast lag).
    WorkersSync { workers: Vec<WorkerSnapshot> },
}

/// Fan-out hub for dispatch events. Publishing is fire-and-forget; it is
/// fine for no observer to be listening.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to real-time dispatch events. Each observer calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: DispatchEvent) {
        debug!(?event, "Publishing dispatch event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        let task_id = Uuid::new_v4();
        hub.publish(DispatchEvent::TaskDiverted {
            task_id,
            specialization: Specialization::CodeFixer,
        });

        match rx.recv().await.unwrap() {
            DispatchEvent::TaskDiverted { task_id: got, .. } => assert_eq!(got, task_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = EventHub::new();
        hub.publish(DispatchEvent::PoolHealth { workers: vec![] });
    }

    #[test]
    fn events_are_tagged_on_the_wire() {
        let event = DispatchEvent::TaskCompleted {
            task_id: Uuid::new_v4(),
            worker_id: crate::pool::WorkerId::indexed(1),
            status: TaskStatus::Completed,
            duration_ms: 420,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_completed");
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["duration_ms"], 420);
    }
}
