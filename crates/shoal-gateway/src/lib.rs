//! Front-door HTTP server and dispatcher facade.
//!
//! The gateway resolves each request to an app directory under the apps
//! root, loads (and caches) the app's configuration, gates oversized bodies
//! before any pool work, and hands the request to the worker pool. Pool
//! errors are classified into HTTP statuses, and every response carries a
//! correlation id.

mod dispatch;
mod error;
mod middleware;
mod routes;
mod state;

pub use error::ApiError;
pub use middleware::{correlation_id, REQUEST_ID_HEADER};
pub use routes::build_router;
pub use state::AppState;
