use std::path::Path;

use tracing::info;

use crate::error::WorkerError;

/// Override for the install command line, used by tests to substitute a stub.
pub const INSTALL_PROGRAM_VAR: &str = "SHOAL_INSTALL_PROGRAM";
/// Default installer. Lifecycle scripts stay disabled so an app manifest
/// cannot run arbitrary code during install.
const DEFAULT_INSTALL: &str = "bun install --ignore-scripts";

/// Run the dependency installer in the app directory. A non-zero exit is
/// fatal for the worker: it never reaches READY.
pub async fn run(app_dir: &Path) -> Result<(), WorkerError> {
    let command_line =
        std::env::var(INSTALL_PROGRAM_VAR).unwrap_or_else(|_| DEFAULT_INSTALL.to_string());
    let mut parts = command_line.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(());
    };

    info!(command = %command_line, app_dir = %app_dir.display(), "running dependency install");
    let status = tokio::process::Command::new(program)
        .args(parts)
        .current_dir(app_dir)
        .status()
        .await
        .map_err(|source| WorkerError::InstallSpawn {
            program: program.to_string(),
            source,
        })?;

    if !status.success() {
        return Err(WorkerError::InstallFailed {
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}
