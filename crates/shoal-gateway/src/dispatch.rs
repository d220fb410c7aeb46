use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use tracing::debug;

use shoal_ipc::IpcRequest;
use shoal_pool::PoolError;

use crate::error::ApiError;
use crate::state::AppState;

/// Catch-all handler: resolve the target app, gate the body, dispatch to the
/// pool, and relay the worker's response.
pub async fn dispatch(
    State(state): State<AppState>,
    req: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    let (app_dir, mut url) = resolve_target(&state, &path)?;
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let config = state.config_for(&app_dir)?;

    // The declared size is checked before a single body byte is read, so an
    // oversized upload never causes a spawn.
    if let Some(declared) = declared_length(&parts.headers) {
        if declared > config.max_body_size_bytes {
            return Err(PoolError::BodyTooLarge {
                size: declared,
                limit: config.max_body_size_bytes,
            }
            .into());
        }
    }
    let body = axum::body::to_bytes(body, config.max_body_size_bytes as usize)
        .await
        .map_err(|_| PoolError::BodyTooLarge {
            size: config.max_body_size_bytes + 1,
            limit: config.max_body_size_bytes,
        })?;

    let ipc_req = IpcRequest {
        method: parts.method.to_string(),
        url,
        headers: header_pairs(&parts.headers),
        body: body.to_vec(),
    };

    debug!(app_dir = %app_dir.display(), method = %parts.method, path = %path, "dispatching");
    let res = state.pool.fetch(&app_dir, &config, ipc_req).await?;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(res.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &res.headers {
            // The body length may have changed in flight (HTML injection);
            // the transport recomputes it.
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.append(name, value);
        }
    }
    builder
        .body(Body::from(res.body))
        .map_err(|e| ApiError::Internal {
            message: format!("response assembly failed: {e}"),
        })
}

/// Map a request path onto (app directory, path-as-seen-by-the-app).
///
/// The first path segment names an app under the apps root; if it matches no
/// app directory, the configured default app (when present) receives the
/// whole path.
fn resolve_target(
    state: &AppState,
    path: &str,
) -> Result<(std::path::PathBuf, String), ApiError> {
    let trimmed = path.trim_start_matches('/');

    if !trimmed.is_empty() {
        let (first, rest) = match trimmed.split_once('/') {
            Some((first, rest)) => (first, format!("/{rest}")),
            None => (trimmed, "/".to_string()),
        };
        if is_valid_app_name(first) {
            let app_dir = state.apps_root.join(first);
            if app_dir.is_dir() {
                return Ok((app_dir, rest));
            }
        }
    }

    if let Some(default_app) = &state.default_app {
        let app_dir = state.apps_root.join(default_app);
        if app_dir.is_dir() {
            return Ok((app_dir, path.to_string()));
        }
    }

    Err(ApiError::AppNotFound {
        name: trimmed.split('/').next().unwrap_or("").to_string(),
    })
}

/// App names are single path segments; anything that could navigate the
/// filesystem is rejected.
fn is_valid_app_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_names_reject_navigation() {
        assert!(is_valid_app_name("blog"));
        assert!(is_valid_app_name("my-app_2"));
        assert!(!is_valid_app_name(".."));
        assert!(!is_valid_app_name("."));
        assert!(!is_valid_app_name(""));
        assert!(!is_valid_app_name("a/b"));
        assert!(!is_valid_app_name("a\\b"));
    }
}
