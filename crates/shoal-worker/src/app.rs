use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::WorkerError;
use crate::handlers::RouteEntry;

/// How an app answers requests, decided once at startup.
#[derive(Debug, Clone)]
pub enum AppShape {
    /// `.html` entrypoint: files under the entrypoint's directory, with the
    /// entrypoint as the SPA fallback for document requests.
    Static { root: PathBuf, index: PathBuf },
    /// Declarative table: exact-path routes with an optional catch-all.
    RouteTable {
        routes: BTreeMap<String, RouteEntry>,
        default: Option<RouteEntry>,
    },
    /// A single handler takes every request.
    HandlerOnly { handler: RouteEntry },
}

/// Optional lifecycle hooks: a relative path (under the app dir) that gets a
/// line appended when the corresponding control frame arrives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hooks {
    pub idle: Option<String>,
    pub terminate: Option<String>,
}

/// An app ready to serve.
#[derive(Debug, Clone)]
pub struct LoadedApp {
    pub shape: AppShape,
    pub hooks: Hooks,
    pub app_dir: PathBuf,
}

/// The on-disk app table for non-static entrypoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AppDefinition {
    handler: Option<RouteEntry>,
    routes: Option<BTreeMap<String, RouteEntry>>,
    default: Option<RouteEntry>,
    hooks: Hooks,
}

/// Resolve the entrypoint and verify it cannot escape the app directory.
/// Both paths are canonicalized, so symlinked escapes fail too.
pub fn resolve_entrypoint(app_dir: &Path, entrypoint: &Path) -> Result<PathBuf, WorkerError> {
    let app_dir = app_dir
        .canonicalize()
        .map_err(|source| WorkerError::Resolve {
            path: app_dir.to_path_buf(),
            source,
        })?;
    let entry = if entrypoint.is_absolute() {
        entrypoint.to_path_buf()
    } else {
        app_dir.join(entrypoint)
    };
    let entry = entry.canonicalize().map_err(|source| WorkerError::Resolve {
        path: entry.clone(),
        source,
    })?;
    if !entry.starts_with(&app_dir) {
        return Err(WorkerError::EntrypointEscape {
            app_dir,
            entrypoint: entry,
        });
    }
    Ok(entry)
}

/// Determine the app shape from a resolved entrypoint.
pub fn load_app(app_dir: &Path, entrypoint: &Path) -> Result<LoadedApp, WorkerError> {
    let entry = resolve_entrypoint(app_dir, entrypoint)?;

    if entry.extension().is_some_and(|ext| ext == "html") {
        let root = entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| app_dir.to_path_buf());
        return Ok(LoadedApp {
            shape: AppShape::Static { root, index: entry },
            hooks: Hooks::default(),
            app_dir: app_dir.to_path_buf(),
        });
    }

    let text = std::fs::read_to_string(&entry).map_err(|source| WorkerError::Resolve {
        path: entry.clone(),
        source,
    })?;
    let def: AppDefinition =
        serde_json::from_str(&text).map_err(|e| WorkerError::AppTable {
            path: entry.clone(),
            message: e.to_string(),
        })?;

    let shape = if let Some(handler) = def.handler {
        AppShape::HandlerOnly { handler }
    } else if let Some(routes) = def.routes {
        AppShape::RouteTable {
            routes,
            default: def.default,
        }
    } else {
        return Err(WorkerError::AppShapeMissing);
    };

    Ok(LoadedApp {
        shape,
        hooks: def.hooks,
        app_dir: app_dir.to_path_buf(),
    })
}
