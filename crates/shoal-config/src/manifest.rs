use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::worker_config::PublicRoutes;

/// Dedicated manifest file name, looked up first.
pub const MANIFEST_FILE: &str = "shoal.toml";
/// Package manifest carrying an embedded section as a fallback.
pub const PACKAGE_FILE: &str = "package.json";
/// Key of the embedded section inside the package manifest.
pub const PACKAGE_SECTION: &str = "shoal";

/// A manifest as written by the app author: durations may be bare seconds or
/// strings like `"30s"`, sizes bare bytes or `"10mb"`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawManifest {
    pub auto_install: Option<bool>,
    pub entrypoint: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub idle_timeout: Option<DurationField>,
    pub low_memory: Option<bool>,
    pub max_body_size: Option<SizeField>,
    pub max_requests: Option<u64>,
    pub public_routes: Option<PublicRoutes>,
    pub timeout: Option<DurationField>,
    pub ttl: Option<DurationField>,
}

/// Numeric seconds or a duration string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationField {
    Seconds(u64),
    Text(String),
}

/// Numeric bytes or a size string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SizeField {
    Bytes(u64),
    Text(String),
}

/// Locate and parse the manifest for `app_dir`.
///
/// Looks for `shoal.toml` first, then the `"shoal"` section of
/// `package.json`. An app without either gets all defaults.
pub fn discover_manifest(app_dir: &Path) -> Result<RawManifest, ConfigError> {
    let toml_path = app_dir.join(MANIFEST_FILE);
    if toml_path.is_file() {
        let text = std::fs::read_to_string(&toml_path).map_err(|source| ConfigError::Io {
            path: toml_path.clone(),
            source,
        })?;
        return toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: toml_path,
            message: e.to_string(),
        });
    }

    let pkg_path = app_dir.join(PACKAGE_FILE);
    if pkg_path.is_file() {
        let text = std::fs::read_to_string(&pkg_path).map_err(|source| ConfigError::Io {
            path: pkg_path.clone(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: pkg_path.clone(),
                message: e.to_string(),
            })?;
        if let Some(section) = value.get(PACKAGE_SECTION) {
            return serde_json::from_value(section.clone()).map_err(|e| ConfigError::Parse {
                path: pkg_path,
                message: e.to_string(),
            });
        }
    }

    Ok(RawManifest::default())
}
