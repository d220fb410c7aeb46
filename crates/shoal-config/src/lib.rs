//! Per-app configuration loading.
//!
//! Each app directory may carry a manifest (`shoal.toml`, or a `"shoal"`
//! section inside `package.json`). The loader normalizes it into a
//! [`WorkerConfig`] with durations in milliseconds and sizes in bytes,
//! expands `${VAR}` references in the env map, and enforces the relationships
//! between timeout, ttl and idle timeout.

mod error;
mod manifest;
mod parse;
mod worker_config;

pub use error::ConfigError;
pub use manifest::{discover_manifest, RawManifest};
pub use parse::{expand_env, parse_duration_ms, parse_size_bytes};
pub use worker_config::{PublicRoutes, WorkerConfig, BODY_SIZE_CEILING_BYTES};
