use std::path::Path;

use sha2::{Digest, Sha256};
use shoal_config::WorkerConfig;

/// Derive the pool key for an app dir + normalized config.
///
/// Identical resolved configs share a worker; any config change produces a
/// new key. The digest input uses the canonical JSON encoding of the config
/// (fixed field order, sorted env map), so equality is stable.
pub fn pool_key(app_dir: &Path, config: &WorkerConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app_dir.to_string_lossy().as_bytes());
    hasher.update([0]);
    hasher.update(config.entrypoint.as_bytes());
    hasher.update([0]);
    hasher.update(config.to_json().as_bytes());
    hex::encode(hasher.finalize())
}
