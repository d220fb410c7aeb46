//! Worker pool and request dispatch.
//!
//! The pool keeps at most one healthy worker per key (app dir + entrypoint +
//! config digest), spawns workers on demand with at-most-one spawn per key
//! under concurrency, retires unhealthy instances into historical metrics,
//! and evicts the least-recently-used entry when capacity runs out.
//! Ephemeral configs (`ttlMs == 0`) bypass the cache entirely: one worker
//! per request, terminated after the response.

mod error;
mod instance;
mod key;
mod metrics;
mod pool;

pub use error::PoolError;
pub use instance::{WorkerInstance, WorkerStats, WorkerStatus, DEFAULT_TERMINATE_GRACE};
pub use key::pool_key;
pub use metrics::{EphemeralScope, EphemeralStats, HistoricalStats, MetricsSnapshot, PoolMetrics};
pub use pool::{PoolOptions, ProcessSpawner, WorkerPool, WorkerSpawner};
