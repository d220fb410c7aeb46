//! Parent <-> worker wire protocol.
//!
//! The runtime parent and its worker subprocesses exchange a closed set of
//! frames over the child's stdin/stdout. Frames are bincode-encoded and
//! length-delimited; request and response bodies travel as owned byte
//! buffers so ownership moves through the channel instead of re-copying at
//! every hop.

mod codec;
mod frame;
mod limits;

pub use codec::{FrameSink, FrameSource, IpcError, MAX_FRAME_BYTES};
pub use frame::{Frame, IpcRequest, IpcResponse};
pub use limits::{
    enforce_header_limits, DEFAULT_CONTENT_TYPE, MAX_HEADER_TOTAL_BYTES, MAX_HEADER_VALUE_BYTES,
    MAX_RESPONSE_HEADERS,
};

/// Environment variables of the spawn protocol. The parent composes these on
/// top of its own environment plus the per-app `env` map.
pub mod env {
    /// Absolute path of the app directory the worker serves.
    pub const APP_DIR: &str = "APP_DIR";
    /// Absolute, resolved entrypoint path.
    pub const ENTRYPOINT: &str = "ENTRYPOINT";
    /// Normalized worker configuration, JSON-encoded.
    pub const WORKER_CONFIG: &str = "WORKER_CONFIG";
    /// Unique id of the worker instance, echoed in logs and diagnostics.
    pub const WORKER_ID: &str = "WORKER_ID";
    /// Set to `1` when the worker should run in reduced-memory mode.
    pub const LOW_MEMORY: &str = "SHOAL_LOW_MEMORY";
}
