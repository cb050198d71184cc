//! Periodic pool-health broadcast.

use std::sync::Arc;
use std::time::Duration;

use crate::events::{DispatchEvent, EventHub};
use crate::pool::WorkerPool;

/// Spawn a background task that pushes the pool snapshot to observers on a
/// fixed interval. Reads only through `snapshot()`, so it never holds a lock
/// across dispatch work.
pub fn spawn_health_broadcast(
    pool: Arc<WorkerPool>,
    events: EventHub,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let workers = pool.snapshot().await;
            events.publish(DispatchEvent::PoolHealth { workers });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::Specialization;
    use tokio::time::timeout;

    #[tokio::test]
    async fn broadcasts_pool_snapshots() {
        let pool = Arc::new(
            WorkerPool::new(&PoolConfig {
                size: 1,
                bands: vec![(Specialization::CodeFixer, 1)],
                baseline_avg_ms: 500,
            })
            .unwrap(),
        );
        let events = EventHub::new();
        let mut rx = events.subscribe();

        let handle = spawn_health_broadcast(pool, events, Duration::from_millis(10));

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        match event {
            DispatchEvent::PoolHealth { workers } => assert_eq!(workers.len(), 1),
            other => panic!("expected PoolHealth, got {other:?}"),
        }

        handle.abort();
    }
}
