use std::path::Path;

use shoal_ipc::{IpcRequest, IpcResponse};

use crate::handlers::sanitize_relative;

/// Serve one request in static-SPA mode.
///
/// `/` maps to the index file; other paths resolve under `root`. Unknown
/// paths fall back to the index for document requests (client-side routing)
/// and 404 otherwise.
pub async fn serve(root: &Path, index: &Path, req: &IpcRequest, path: &str) -> IpcResponse {
    if path == "/" {
        return read_file(index).await;
    }

    let rel = path.trim_start_matches('/');
    if let Some(candidate) = sanitize_relative(root, rel) {
        if candidate.is_file() {
            return read_file(&candidate).await;
        }
    }

    if accepts_html(req) {
        return read_file(index).await;
    }
    IpcResponse::with_status(404)
}

fn accepts_html(req: &IpcRequest) -> bool {
    req.header("accept")
        .is_some_and(|accept| accept.contains("text/html"))
}

async fn read_file(path: &Path) -> IpcResponse {
    match tokio::fs::read(path).await {
        Ok(body) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            IpcResponse {
                status: 200,
                headers: vec![("content-type".into(), mime.essence_str().to_string())],
                body,
            }
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "static file read failed");
            IpcResponse::with_status(404)
        }
    }
}
