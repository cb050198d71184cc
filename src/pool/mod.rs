//! Worker pool — fixed-capacity registry of specialized workers.
//!
//! Core components:
//! - `worker` — per-worker state (specialization, busy tracking, rolling metric)
//! - `pool` — the registry itself (eligibility queries, reserve/release)

pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::{Specialization, Worker, WorkerId, WorkerSnapshot};
