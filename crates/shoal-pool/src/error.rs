use thiserror::Error;

/// Pool-level failures, classified so the dispatcher can map them onto HTTP
/// statuses. Cloneable because spawn failures are fanned out to every
/// request waiting on the same in-flight creation.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Child failed to start or died before READY (502).
    #[error("worker spawn failed: {message}")]
    Spawn { message: String },

    /// No reply within the per-request deadline (504).
    #[error("worker timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// The app handler reported a failure for this request (500).
    #[error("{message}")]
    Handler { message: String },

    /// The worker channel broke after READY; the instance is retired on its
    /// next health check (500).
    #[error("worker failed: {message}")]
    Critical { message: String },

    /// Declared or streamed request body exceeds the app's limit (413).
    #[error("request body of {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: u64, limit: u64 },

    /// The pool no longer admits requests (shutting down).
    #[error("pool is shut down")]
    Closed,
}
