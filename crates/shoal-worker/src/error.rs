use std::path::PathBuf;
use thiserror::Error;

/// Fatal worker startup and channel errors. Any of these kill the child
/// before or after READY; per-request handler failures travel as `ERROR`
/// frames instead and never reach this type.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("entrypoint {} escapes app directory {}", .entrypoint.display(), .app_dir.display())]
    EntrypointEscape {
        app_dir: PathBuf,
        entrypoint: PathBuf,
    },

    #[error("cannot resolve {}: {source}", .path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dependency install failed with status {status}")]
    InstallFailed { status: i32 },

    #[error("failed to run installer {program}: {source}")]
    InstallSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("app table {} is not valid JSON: {message}", .path.display())]
    AppTable { path: PathBuf, message: String },

    #[error("app defines neither a handler nor routes")]
    AppShapeMissing,

    #[error(transparent)]
    Config(#[from] shoal_config::ConfigError),

    #[error(transparent)]
    Ipc(#[from] shoal_ipc::IpcError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
