//! Child-side worker runtime.
//!
//! A worker is spawned by the pool with its configuration in the
//! environment (`APP_DIR`, `ENTRYPOINT`, `WORKER_CONFIG`, `WORKER_ID`). It
//! resolves the app's shape once at startup, emits `READY`, then answers
//! `REQUEST` frames on stdin with `RESPONSE`/`ERROR` frames on stdout until
//! it receives `TERMINATE` or the parent closes the channel.
//!
//! The runtime is single-threaded cooperative: requests are multiplexed on a
//! current-thread executor, so a sleeping handler never blocks its siblings.

mod app;
mod error;
mod handlers;
mod inject;
mod install;
mod runtime;
mod static_files;

pub use app::{AppShape, Hooks, LoadedApp};
pub use error::WorkerError;
pub use handlers::{EchoField, Handler, RouteEntry, StaticResponse};
pub use runtime::{run_from_env, serve, WorkerContext};
