use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use shoal_config::{ConfigError, WorkerConfig};
use shoal_pool::WorkerPool;

/// Shared server state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: WorkerPool,
    pub apps_root: PathBuf,
    /// App served for requests whose first path segment matches no app.
    pub default_app: Option<String>,
    configs: Arc<DashMap<PathBuf, Arc<WorkerConfig>>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(pool: WorkerPool, apps_root: PathBuf, default_app: Option<String>) -> Self {
        Self {
            pool,
            apps_root,
            default_app,
            configs: Arc::new(DashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// The app's normalized config, loaded on first use and cached. Configs
    /// are immutable per load; editing a manifest requires a restart.
    pub fn config_for(&self, app_dir: &Path) -> Result<Arc<WorkerConfig>, ConfigError> {
        if let Some(config) = self.configs.get(app_dir) {
            return Ok(config.clone());
        }
        let config = Arc::new(WorkerConfig::load(app_dir)?);
        self.configs
            .insert(app_dir.to_path_buf(), config.clone());
        Ok(config)
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
