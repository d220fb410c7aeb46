use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use futures::future::BoxFuture;
use serde::Deserialize;
use shoal_ipc::{IpcRequest, IpcResponse};

/// One entry of a route table. Untagged: a built-in handler object, a
/// method map, or a literal response, tried in that order.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RouteEntry {
    Handler(Handler),
    Static(StaticResponse),
    Methods(BTreeMap<String, RouteEntry>),
}

/// The built-in handler set. Apps are declarative bundles; these cover the
/// request/response behaviors a bundle can express beyond literal responses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handler {
    /// Reply with one field of the incoming request.
    Echo(EchoField),
    /// Serve a file from the app directory.
    File(String),
    /// Reply with the value of an environment variable.
    Env(String),
    /// Sleep cooperatively, then evaluate the inner entry.
    Delay { ms: u64, then: Box<RouteEntry> },
    /// Reply with a JSON document.
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoField {
    Path,
    Url,
    Method,
    Body,
}

/// A literal response. Headers are ordered pairs; insertion order is kept
/// through the safety caps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StaticResponse {
    pub status: Option<u16>,
    pub headers: Option<Vec<(String, String)>>,
    pub body: Option<String>,
}

/// Everything a handler may look at while producing a response.
pub struct RequestContext<'a> {
    pub req: &'a IpcRequest,
    pub app_dir: &'a Path,
    pub path: &'a str,
}

/// Path component of a request url, query stripped. Accepts both absolute
/// URLs and bare paths.
pub fn request_path(url: &str) -> String {
    if url.contains("://") {
        if let Ok(parsed) = url::Url::parse(url) {
            return parsed.path().to_string();
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or("/");
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Evaluate a route entry. Recursive (delay wrappers, method maps), hence
/// the boxed future.
pub fn eval_entry<'a>(
    entry: &'a RouteEntry,
    ctx: &'a RequestContext<'a>,
) -> BoxFuture<'a, anyhow::Result<IpcResponse>> {
    Box::pin(async move {
        match entry {
            RouteEntry::Static(res) => Ok(static_response(res)),
            RouteEntry::Methods(map) => {
                let method = ctx.req.method.to_ascii_uppercase();
                match map.get(&method) {
                    Some(inner) => eval_entry(inner, ctx).await,
                    None => Ok(IpcResponse::with_status(405)),
                }
            }
            RouteEntry::Handler(handler) => eval_handler(handler, ctx).await,
        }
    })
}

async fn eval_handler(handler: &Handler, ctx: &RequestContext<'_>) -> anyhow::Result<IpcResponse> {
    match handler {
        Handler::Echo(field) => {
            let body = match field {
                EchoField::Path => ctx.path.as_bytes().to_vec(),
                EchoField::Url => ctx.req.url.clone().into_bytes(),
                EchoField::Method => ctx.req.method.clone().into_bytes(),
                EchoField::Body => ctx.req.body.clone(),
            };
            Ok(IpcResponse {
                status: 200,
                headers: Vec::new(),
                body,
            })
        }
        Handler::File(rel) => serve_app_file(ctx.app_dir, rel).await,
        Handler::Env(name) => match std::env::var(name) {
            Ok(value) => Ok(IpcResponse {
                status: 200,
                headers: Vec::new(),
                body: value.into_bytes(),
            }),
            Err(_) => Ok(IpcResponse::with_status(404)),
        },
        Handler::Delay { ms, then } => {
            tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
            eval_entry(then, ctx).await
        }
        Handler::Json(value) => {
            let body = serde_json::to_vec(value).context("serializing json handler body")?;
            Ok(IpcResponse {
                status: 200,
                headers: vec![("content-type".into(), "application/json".into())],
                body,
            })
        }
    }
}

fn static_response(res: &StaticResponse) -> IpcResponse {
    IpcResponse {
        status: res.status.unwrap_or(200),
        headers: res.headers.clone().unwrap_or_default(),
        body: res.body.clone().map(String::into_bytes).unwrap_or_default(),
    }
}

/// Join a handler-declared relative path onto the app dir, refusing parent
/// and absolute components.
pub fn sanitize_relative(base: &Path, rel: &str) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

async fn serve_app_file(app_dir: &Path, rel: &str) -> anyhow::Result<IpcResponse> {
    let Some(path) = sanitize_relative(app_dir, rel) else {
        return Ok(IpcResponse::with_status(404));
    };
    match tokio::fs::read(&path).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            Ok(IpcResponse {
                status: 200,
                headers: vec![("content-type".into(), mime.essence_str().to_string())],
                body,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(IpcResponse::with_status(404))
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}
