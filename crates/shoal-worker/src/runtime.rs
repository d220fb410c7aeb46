use std::path::{Path, PathBuf};
use std::rc::Rc;

use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shoal_config::WorkerConfig;
use shoal_ipc::{env, Frame, FrameSink, FrameSource, IpcRequest, IpcResponse};
use shoal_ipc::{enforce_header_limits, DEFAULT_CONTENT_TYPE};

use crate::app::{self, AppShape, LoadedApp};
use crate::error::WorkerError;
use crate::handlers::{eval_entry, request_path, sanitize_relative, RequestContext};
use crate::inject::{client_env, env_prefixes, inject_html, Injection};
use crate::install;
use crate::static_files;

/// Spawn-time parameters, read back from the environment the pool composed.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub app_dir: PathBuf,
    pub entrypoint: PathBuf,
    pub config: WorkerConfig,
    pub worker_id: String,
    pub low_memory: bool,
}

impl WorkerContext {
    pub fn from_env() -> Result<Self, WorkerError> {
        Ok(Self {
            app_dir: PathBuf::from(required(env::APP_DIR)?),
            entrypoint: PathBuf::from(required(env::ENTRYPOINT)?),
            config: WorkerConfig::from_json(&required(env::WORKER_CONFIG)?)?,
            worker_id: required(env::WORKER_ID)?,
            low_memory: std::env::var(env::LOW_MEMORY).is_ok_and(|v| v == "1"),
        })
    }
}

fn required(name: &'static str) -> Result<String, WorkerError> {
    std::env::var(name).map_err(|_| WorkerError::MissingEnv(name))
}

/// Full child lifecycle: resolve, install, load, then serve stdio frames.
/// This is the body of the `worker` subcommand and of the `shoal-worker`
/// bin; it expects a current-thread runtime.
pub async fn run_from_env() -> anyhow::Result<()> {
    let ctx = WorkerContext::from_env()?;
    if ctx.low_memory {
        info!(worker_id = %ctx.worker_id, "running in low-memory mode");
    }

    // Containment is checked before anything touches the app dir.
    let entry = app::resolve_entrypoint(&ctx.app_dir, &ctx.entrypoint)?;
    if ctx.config.auto_install {
        install::run(&ctx.app_dir).await?;
    }
    let loaded = app::load_app(&ctx.app_dir, &entry)?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(serve(loaded, ctx, tokio::io::stdin(), tokio::io::stdout()))
        .await
}

/// The frame loop. Generic over the channel so tests can run it over an
/// in-process duplex pipe.
pub async fn serve<R, W>(
    app: LoadedApp,
    ctx: WorkerContext,
    reader: R,
    writer: W,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + 'static,
{
    let app = Rc::new(app);
    let prefixes = Rc::new(env_prefixes());
    let mut source = FrameSource::new(reader);

    let (tx, mut rx) = mpsc::channel::<Frame>(if ctx.low_memory { 4 } else { 32 });
    let writer_task = tokio::task::spawn_local(async move {
        let mut sink = FrameSink::new(writer);
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(&frame).await {
                warn!(error = %e, "failed to write frame, stopping writer");
                break;
            }
        }
    });

    tx.send(Frame::Ready)
        .await
        .map_err(|_| anyhow::anyhow!("frame writer went away before READY"))?;
    info!(worker_id = %ctx.worker_id, app_dir = %ctx.app_dir.display(), "worker ready");

    loop {
        match source.next().await? {
            None => {
                debug!("parent closed the channel");
                break;
            }
            Some(Frame::Request { req_id, req }) => {
                let app = app.clone();
                let prefixes = prefixes.clone();
                let tx = tx.clone();
                tokio::task::spawn_local(handle_request(app, prefixes, req_id, req, tx));
            }
            Some(Frame::Idle) => {
                debug!(worker_id = %ctx.worker_id, "idle signal");
                run_hook(&app.app_dir, app.hooks.idle.as_deref(), "idle").await;
            }
            Some(Frame::Terminate) => {
                info!(worker_id = %ctx.worker_id, "terminate signal");
                run_hook(&app.app_dir, app.hooks.terminate.as_deref(), "terminate").await;
                break;
            }
            Some(other) => {
                warn!(frame = ?other, "unexpected frame from parent");
            }
        }
    }

    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

/// One request, fully isolated: handler errors and panics become ERROR
/// frames, never a dead child.
async fn handle_request(
    app: Rc<LoadedApp>,
    prefixes: Rc<Vec<String>>,
    req_id: Uuid,
    req: IpcRequest,
    tx: mpsc::Sender<Frame>,
) {
    let outcome = std::panic::AssertUnwindSafe(serve_one(&app, &req, &prefixes))
        .catch_unwind()
        .await;

    let frame = match outcome {
        Ok(Ok(res)) => Frame::Response { req_id, res },
        Ok(Err(e)) => Frame::Error {
            req_id,
            error: e.to_string(),
            stack: Some(format!("{e:?}")),
        },
        Err(panic) => Frame::Error {
            req_id,
            error: panic_message(&panic),
            stack: None,
        },
    };
    let _ = tx.send(frame).await;
}

async fn serve_one(
    app: &LoadedApp,
    req: &IpcRequest,
    prefixes: &[String],
) -> anyhow::Result<IpcResponse> {
    let path = request_path(&req.url);
    let res = match &app.shape {
        AppShape::Static { root, index } => static_files::serve(root, index, req, &path).await,
        AppShape::HandlerOnly { handler } => {
            let ctx = RequestContext {
                req,
                app_dir: &app.app_dir,
                path: &path,
            };
            eval_entry(handler, &ctx).await?
        }
        AppShape::RouteTable { routes, default } => {
            let ctx = RequestContext {
                req,
                app_dir: &app.app_dir,
                path: &path,
            };
            if let Some(entry) = routes.get(path.as_str()) {
                eval_entry(entry, &ctx).await?
            } else if let Some(entry) = default {
                eval_entry(entry, &ctx).await?
            } else {
                IpcResponse::with_status(404)
            }
        }
    };
    Ok(finalize(res, req, prefixes))
}

/// Header caps, default content type, HTML injection.
fn finalize(mut res: IpcResponse, req: &IpcRequest, prefixes: &[String]) -> IpcResponse {
    res.headers = enforce_header_limits(res.headers);
    if res.header("content-type").is_none() {
        res.headers
            .push(("content-type".into(), DEFAULT_CONTENT_TYPE.into()));
    }

    let is_html = res
        .header("content-type")
        .is_some_and(|ct| ct.contains("text/html"));
    if is_html {
        let injection = Injection {
            base_href: req.header("x-base"),
            env: client_env(prefixes),
        };
        let before = res.body.len();
        res.body = inject_html(std::mem::take(&mut res.body), &injection);
        if res.body.len() != before {
            res.headers
                .retain(|(n, _)| !n.eq_ignore_ascii_case("content-length"));
        }
    }
    res
}

async fn run_hook(app_dir: &Path, hook: Option<&str>, label: &str) {
    let Some(rel) = hook else { return };
    let Some(path) = sanitize_relative(app_dir, rel) else {
        warn!(hook = rel, "hook path escapes app dir, skipping");
        return;
    };
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{label}\n").as_bytes()).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = result {
        warn!(hook = rel, error = %e, "hook write failed");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
