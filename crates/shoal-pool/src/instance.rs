use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use shoal_config::WorkerConfig;
use shoal_ipc::{env as ipc_env, Frame, FrameSink, FrameSource, IpcRequest, IpcResponse};

use crate::error::PoolError;

/// How long a worker gets between TERMINATE and the hard kill.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_millis(50);

/// Barrier state driven by the reader task.
#[derive(Debug)]
enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

enum WorkerReply {
    Response(IpcResponse),
    Error(String),
}

/// Activity view of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub active: bool,
    pub idle: bool,
}

/// Point-in-time stats of one instance. Averages are rounded to two
/// decimals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub age_ms: u64,
    pub idle_ms: u64,
    pub status: String,
    pub request_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: f64,
    pub avg_response_time_ms: f64,
}

/// Parent-side handle to one worker subprocess.
///
/// Owns the frame channel: a reader task correlates RESPONSE/ERROR frames to
/// waiting requests by `req_id` and resolves the ready barrier on READY; a
/// writer task drains outbound frames. Any channel failure latches
/// `critical`, which makes the instance unhealthy for the pool.
pub struct WorkerInstance {
    id: Uuid,
    config: WorkerConfig,
    created_at: Instant,
    last_used: Mutex<Instant>,
    request_count: AtomicU64,
    error_count: AtomicU64,
    total_response_time_ms: Mutex<f64>,
    idle_signal_sent: AtomicBool,
    critical: Arc<AtomicBool>,
    ready_rx: watch::Receiver<ReadyState>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<WorkerReply>>>,
    outbound: mpsc::Sender<Frame>,
    child: tokio::sync::Mutex<Option<Child>>,
    terminated: AtomicBool,
}

impl WorkerInstance {
    /// Spawn a worker subprocess for `app_dir` and wire up its channel.
    ///
    /// The child environment is the parent's, plus the config's `env` map,
    /// plus the spawn protocol variables.
    pub fn spawn_process(
        app_dir: &Path,
        config: &WorkerConfig,
        program: &Path,
        args: &[String],
    ) -> Result<Self, PoolError> {
        let id = Uuid::new_v4();
        let app_dir = app_dir
            .canonicalize()
            .unwrap_or_else(|_| app_dir.to_path_buf());
        let entrypoint = app_dir.join(&config.entrypoint);

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(config.env.iter())
            .env(ipc_env::APP_DIR, &app_dir)
            .env(ipc_env::ENTRYPOINT, &entrypoint)
            .env(ipc_env::WORKER_CONFIG, config.to_json())
            .env(ipc_env::WORKER_ID, id.to_string())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);
        if config.low_memory {
            command.env(ipc_env::LOW_MEMORY, "1");
        }

        let mut child = command.spawn().map_err(|e| PoolError::Spawn {
            message: format!("failed to spawn {}: {e}", program.display()),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| PoolError::Spawn {
            message: "worker stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| PoolError::Spawn {
            message: "worker stdout unavailable".into(),
        })?;

        debug!(worker_id = %id, app_dir = %app_dir.display(), "worker spawned");
        Ok(Self::connect(id, config.clone(), stdout, stdin, Some(child)))
    }

    /// Build an instance over an arbitrary byte channel. Production goes
    /// through [`WorkerInstance::spawn_process`]; tests connect in-process
    /// duplex pipes with no child.
    pub fn connect<R, W>(
        id: Uuid,
        config: WorkerConfig,
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);
        let pending: Arc<DashMap<Uuid, oneshot::Sender<WorkerReply>>> = Arc::new(DashMap::new());
        let critical = Arc::new(AtomicBool::new(false));
        let (outbound, outbound_rx) = mpsc::channel::<Frame>(32);

        spawn_reader(id, reader, ready_tx, pending.clone(), critical.clone());
        spawn_writer(id, writer, outbound_rx);

        let now = Instant::now();
        Self {
            id,
            config,
            created_at: now,
            last_used: Mutex::new(now),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_response_time_ms: Mutex::new(0.0),
            idle_signal_sent: AtomicBool::new(false),
            critical,
            ready_rx,
            pending,
            outbound,
            child: tokio::sync::Mutex::new(child),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Serve one request: await the ready barrier, post the REQUEST frame,
    /// and wait for the correlated reply under the hard deadline.
    pub async fn fetch(&self, req: IpcRequest) -> Result<IpcResponse, PoolError> {
        let timeout_ms = self.config.timeout_ms;
        let deadline = Duration::from_millis(timeout_ms);

        tokio::time::timeout(deadline, self.wait_ready())
            .await
            .map_err(|_| PoolError::Timeout { timeout_ms })??;
        if self.critical.load(Ordering::Relaxed) {
            return Err(PoolError::Critical {
                message: "worker channel failed".into(),
            });
        }

        self.touch();
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let req_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(req_id, reply_tx);

        if self
            .outbound
            .send(Frame::Request { req_id, req })
            .await
            .is_err()
        {
            self.pending.remove(&req_id);
            return Err(PoolError::Critical {
                message: "worker channel closed".into(),
            });
        }

        let reply = match tokio::time::timeout(deadline, reply_rx).await {
            Err(_) => {
                // Tear down the listener; a late reply is dropped by the
                // reader task as unknown.
                self.pending.remove(&req_id);
                return Err(PoolError::Timeout { timeout_ms });
            }
            Ok(Err(_)) => {
                return Err(PoolError::Critical {
                    message: "worker exited mid-request".into(),
                })
            }
            Ok(Ok(reply)) => reply,
        };

        match reply {
            WorkerReply::Response(res) => Ok(res),
            WorkerReply::Error(message) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::Handler { message })
            }
        }
    }

    async fn wait_ready(&self) -> Result<(), PoolError> {
        let mut rx = self.ready_rx.clone();
        loop {
            {
                let state = rx.borrow_and_update();
                match &*state {
                    ReadyState::Ready => return Ok(()),
                    ReadyState::Failed(message) => {
                        return Err(PoolError::Spawn {
                            message: message.clone(),
                        })
                    }
                    ReadyState::Pending => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(PoolError::Spawn {
                    message: "worker channel closed before READY".into(),
                });
            }
        }
    }

    /// Mark the instance used: bumps `last_used` and re-arms the idle
    /// signal latch.
    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
        self.idle_signal_sent.store(false, Ordering::Relaxed);
    }

    /// Activity state. On the first observation of an idle transition, one
    /// IDLE frame is sent to the worker; the latch resets on `touch`.
    pub fn status(&self) -> WorkerStatus {
        let idle_for = self.last_used.lock().elapsed();
        let active = (idle_for.as_millis() as u64) < self.config.idle_timeout_ms;
        if !active && !self.idle_signal_sent.swap(true, Ordering::Relaxed) {
            if self.outbound.try_send(Frame::Idle).is_err() {
                warn!(worker_id = %self.id, "could not send idle signal");
            }
        }
        WorkerStatus {
            active,
            idle: !active,
        }
    }

    /// Health predicate the pool gates reuse on. Ephemeral instances are
    /// one-shot: any served request makes them unhealthy.
    pub fn is_healthy(&self) -> bool {
        if self.critical.load(Ordering::Relaxed) || self.terminated.load(Ordering::Relaxed) {
            return false;
        }
        let request_count = self.request_count.load(Ordering::Relaxed);
        if self.config.ttl_ms == 0 {
            return request_count == 0;
        }
        let age_ms = self.created_at.elapsed().as_millis() as u64;
        let idle_ms = self.last_used.lock().elapsed().as_millis() as u64;
        age_ms < self.config.ttl_ms
            && idle_ms < self.config.idle_timeout_ms
            && (self.config.max_requests == 0 || request_count < self.config.max_requests)
    }

    pub fn record_response_time(&self, duration_ms: f64) {
        *self.total_response_time_ms.lock() += duration_ms;
    }

    pub fn last_used_at(&self) -> Instant {
        *self.last_used.lock()
    }

    pub fn stats(&self) -> WorkerStats {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let total = *self.total_response_time_ms.lock();
        let avg = if request_count > 0 {
            total / request_count as f64
        } else {
            0.0
        };
        let status = self.status();
        WorkerStats {
            age_ms: self.created_at.elapsed().as_millis() as u64,
            idle_ms: self.last_used.lock().elapsed().as_millis() as u64,
            status: if status.active { "active" } else { "idle" }.to_string(),
            request_count,
            error_count: self.error_count.load(Ordering::Relaxed),
            total_response_time_ms: round2(total),
            avg_response_time_ms: round2(avg),
        }
    }

    /// Ask the worker to stop, give it the grace period, then kill it.
    /// Idempotent; errors are swallowed.
    pub async fn terminate(&self, grace: Duration) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(worker_id = %self.id, "terminating worker");
        let _ = self.outbound.send(Frame::Terminate).await;
        tokio::time::sleep(grace).await;
        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.kill().await;
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn spawn_reader<R>(
    id: Uuid,
    reader: R,
    ready_tx: watch::Sender<ReadyState>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<WorkerReply>>>,
    critical: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut source = FrameSource::new(reader);
        let failure: String = loop {
            match source.next().await {
                Ok(Some(Frame::Ready)) => {
                    let _ = ready_tx.send(ReadyState::Ready);
                }
                Ok(Some(Frame::Response { req_id, res })) => {
                    match pending.remove(&req_id) {
                        Some((_, reply_tx)) => {
                            let _ = reply_tx.send(WorkerReply::Response(res));
                        }
                        None => {
                            debug!(worker_id = %id, %req_id, "reply for unknown request, dropping");
                        }
                    }
                }
                Ok(Some(Frame::Error {
                    req_id,
                    error,
                    stack,
                })) => {
                    if let Some(stack) = stack {
                        debug!(worker_id = %id, %req_id, %stack, "worker error detail");
                    }
                    if let Some((_, reply_tx)) = pending.remove(&req_id) {
                        let _ = reply_tx.send(WorkerReply::Error(error));
                    }
                }
                Ok(Some(other)) => {
                    warn!(worker_id = %id, frame = ?other, "unexpected frame from worker");
                }
                Ok(None) => break "worker closed its channel".to_string(),
                Err(e) => break format!("worker channel error: {e}"),
            }
        };

        critical.store(true, Ordering::Relaxed);
        ready_tx.send_if_modified(|state| {
            if matches!(state, ReadyState::Pending) {
                *state = ReadyState::Failed(failure.clone());
                true
            } else {
                false
            }
        });
        // Dropping the senders fails every in-flight request on this worker.
        pending.clear();
        debug!(worker_id = %id, reason = %failure, "worker channel closed");
    });
}

fn spawn_writer<W>(id: Uuid, writer: W, mut outbound_rx: mpsc::Receiver<Frame>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut sink = FrameSink::new(writer);
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = sink.send(&frame).await {
                debug!(worker_id = %id, error = %e, "worker write failed, stopping writer");
                break;
            }
        }
    });
}
