use std::path::PathBuf;
use thiserror::Error;

/// Fatal manifest problems. A request targeting an app whose manifest fails
/// to load surfaces as a 500 at the dispatcher.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid size for {field}: {value:?}")]
    InvalidSize { field: &'static str, value: String },

    #[error("invalid config: {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}
