use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::manifest::{discover_manifest, DurationField, RawManifest, SizeField};
use crate::parse::{expand_env, parse_duration_ms, parse_size_bytes};

/// Runtime-wide ceiling on `maxBodySize`, regardless of what a manifest asks
/// for.
pub const BODY_SIZE_CEILING_BYTES: u64 = 128 * 1024 * 1024;

const DEFAULT_ENTRYPOINT: &str = "index.html";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TTL_MS: u64 = 300_000;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_BODY_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Route patterns exempt from authentication, passed through to the auth
/// layer untouched. Either a flat list or a per-method map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublicRoutes {
    List(Vec<String>),
    ByMethod(BTreeMap<String, Vec<String>>),
}

impl Default for PublicRoutes {
    fn default() -> Self {
        PublicRoutes::List(Vec::new())
    }
}

/// Normalized per-app configuration: durations in milliseconds, sizes in
/// bytes, env already expanded. Immutable once loaded; a changed config
/// yields a new pool key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub auto_install: bool,
    pub entrypoint: String,
    pub env: BTreeMap<String, String>,
    pub timeout_ms: u64,
    /// `0` means ephemeral: one request per worker, terminated afterwards.
    pub ttl_ms: u64,
    pub idle_timeout_ms: u64,
    /// `0` means unlimited.
    pub max_requests: u64,
    pub max_body_size_bytes: u64,
    pub low_memory: bool,
    pub public_routes: PublicRoutes,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            auto_install: false,
            entrypoint: DEFAULT_ENTRYPOINT.to_string(),
            env: BTreeMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ttl_ms: DEFAULT_TTL_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_requests: 0,
            max_body_size_bytes: DEFAULT_MAX_BODY_SIZE_BYTES,
            low_memory: false,
            public_routes: PublicRoutes::default(),
        }
    }
}

impl WorkerConfig {
    /// Load and normalize the manifest of `app_dir`.
    pub fn load(app_dir: &Path) -> Result<Self, ConfigError> {
        let raw = discover_manifest(app_dir)?;
        Self::from_manifest(raw, |name| std::env::var(name).ok())
    }

    /// Normalize a raw manifest. `lookup` resolves `${VAR}` references in the
    /// env map.
    pub fn from_manifest<F>(raw: RawManifest, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = WorkerConfig {
            auto_install: raw.auto_install.unwrap_or(false),
            entrypoint: raw
                .entrypoint
                .unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string()),
            ..WorkerConfig::default()
        };

        if let Some(env) = raw.env {
            config.env = env
                .into_iter()
                .map(|(k, v)| (k, expand_env(&v, &lookup)))
                .collect();
        }
        if let Some(field) = raw.timeout {
            config.timeout_ms = duration_ms("timeout", field)?;
        }
        if let Some(field) = raw.ttl {
            config.ttl_ms = duration_ms("ttl", field)?;
        }
        if let Some(field) = raw.idle_timeout {
            config.idle_timeout_ms = duration_ms("idleTimeout", field)?;
        }
        if let Some(n) = raw.max_requests {
            config.max_requests = n;
        }
        if let Some(field) = raw.max_body_size {
            let bytes = match field {
                SizeField::Bytes(n) => n,
                SizeField::Text(s) => parse_size_bytes("maxBodySize", &s)?,
            };
            config.max_body_size_bytes = bytes.min(BODY_SIZE_CEILING_BYTES);
        }
        if let Some(v) = raw.low_memory {
            config.low_memory = v;
        }
        if let Some(routes) = raw.public_routes {
            config.public_routes = routes;
        }

        config.validate()?;
        Ok(config)
    }

    /// Enforce the duration relationships. `idleTimeout > ttl` is clamped
    /// with a warning; the other violations are fatal.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout",
                message: "must be greater than zero".into(),
            });
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "idleTimeout",
                message: "must be greater than zero".into(),
            });
        }
        if self.max_body_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "maxBodySize",
                message: "must be greater than zero".into(),
            });
        }
        if self.ttl_ms > 0 {
            if self.ttl_ms < self.timeout_ms {
                return Err(ConfigError::Invalid {
                    field: "ttl",
                    message: format!(
                        "ttl ({}ms) must not be shorter than timeout ({}ms)",
                        self.ttl_ms, self.timeout_ms
                    ),
                });
            }
            if self.idle_timeout_ms < self.timeout_ms {
                return Err(ConfigError::Invalid {
                    field: "idleTimeout",
                    message: format!(
                        "idleTimeout ({}ms) must not be shorter than timeout ({}ms)",
                        self.idle_timeout_ms, self.timeout_ms
                    ),
                });
            }
            if self.idle_timeout_ms > self.ttl_ms {
                warn!(
                    idle_timeout_ms = self.idle_timeout_ms,
                    ttl_ms = self.ttl_ms,
                    "idleTimeout exceeds ttl, clamping"
                );
                self.idle_timeout_ms = self.ttl_ms;
            }
        }
        Ok(())
    }

    /// Whether workers for this config are one-shot.
    pub fn is_ephemeral(&self) -> bool {
        self.ttl_ms == 0
    }

    /// Serialize for the `WORKER_CONFIG` environment variable.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse the `WORKER_CONFIG` environment variable.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: "WORKER_CONFIG".into(),
            message: e.to_string(),
        })
    }
}

fn duration_ms(field: &'static str, value: DurationField) -> Result<u64, ConfigError> {
    match value {
        DurationField::Seconds(secs) => Ok(secs.saturating_mul(1_000)),
        DurationField::Text(s) => parse_duration_ms(field, &s),
    }
}
