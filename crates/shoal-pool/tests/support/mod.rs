//! In-process mock workers for pool and instance tests: a scripted peer on
//! the other end of a duplex pipe, speaking the real frame protocol.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use uuid::Uuid;

use shoal_config::WorkerConfig;
use shoal_ipc::{Frame, FrameSink, FrameSource, IpcResponse};
use shoal_pool::{PoolError, WorkerInstance, WorkerSpawner};

/// What the scripted worker does with requests.
#[derive(Debug, Clone, Copy)]
pub enum MockMode {
    /// READY, then answer every request with the worker's own id.
    Echo,
    /// READY, then never answer anything.
    Silent,
    /// READY, then answer every request with an ERROR frame.
    ErrorReply,
    /// Delay READY, then behave like `Echo`.
    ReadyDelay(Duration),
    /// Close the channel immediately, before READY.
    ExitImmediately,
    /// Refuse to spawn at all (spawner-level failure).
    FailSpawn,
}

/// Control-frame observations of a mock worker.
#[derive(Clone, Default)]
pub struct MockSignals {
    pub idle: Arc<AtomicUsize>,
    pub terminate: Arc<AtomicUsize>,
}

impl MockSignals {
    pub fn idle_count(&self) -> usize {
        self.idle.load(Ordering::SeqCst)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminate.load(Ordering::SeqCst)
    }
}

/// Build a `WorkerInstance` wired to a scripted in-process worker.
pub fn connect_instance(config: &WorkerConfig, mode: MockMode) -> (WorkerInstance, MockSignals) {
    let id = Uuid::new_v4();
    let (parent_io, worker_io) = tokio::io::duplex(1 << 20);
    let (parent_read, parent_write) = tokio::io::split(parent_io);
    let (worker_read, worker_write) = tokio::io::split(worker_io);

    let signals = MockSignals::default();
    tokio::spawn(mock_worker_loop(
        id,
        worker_read,
        worker_write,
        mode,
        signals.clone(),
    ));

    (
        WorkerInstance::connect(id, config.clone(), parent_read, parent_write, None),
        signals,
    )
}

async fn mock_worker_loop(
    id: Uuid,
    reader: ReadHalf<tokio::io::DuplexStream>,
    writer: WriteHalf<tokio::io::DuplexStream>,
    mode: MockMode,
    signals: MockSignals,
) {
    if matches!(mode, MockMode::ExitImmediately) {
        return;
    }

    let mut source = FrameSource::new(reader);
    let mut sink = FrameSink::new(writer);

    if let MockMode::ReadyDelay(delay) = mode {
        tokio::time::sleep(delay).await;
    }
    if sink.send(&Frame::Ready).await.is_err() {
        return;
    }

    loop {
        match source.next().await {
            Ok(Some(Frame::Request { req_id, .. })) => match mode {
                MockMode::Silent => {}
                MockMode::ErrorReply => {
                    let _ = sink
                        .send(&Frame::Error {
                            req_id,
                            error: "handler exploded".into(),
                            stack: None,
                        })
                        .await;
                }
                _ => {
                    let _ = sink
                        .send(&Frame::Response {
                            req_id,
                            res: IpcResponse {
                                status: 200,
                                headers: vec![("x-worker".into(), id.to_string())],
                                body: id.to_string().into_bytes(),
                            },
                        })
                        .await;
                }
            },
            Ok(Some(Frame::Idle)) => {
                signals.idle.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Some(Frame::Terminate)) => {
                signals.terminate.fetch_add(1, Ordering::SeqCst);
                break;
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
}

/// Pool-level spawner backed by scripted workers.
pub struct MockSpawner {
    pub mode: MockMode,
    pub spawned: AtomicUsize,
}

impl MockSpawner {
    pub fn new(mode: MockMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            spawned: AtomicUsize::new(0),
        })
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for MockSpawner {
    fn spawn(&self, _app_dir: &Path, config: &WorkerConfig) -> Result<WorkerInstance, PoolError> {
        if matches!(self.mode, MockMode::FailSpawn) {
            return Err(PoolError::Spawn {
                message: "spawner refused".into(),
            });
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(connect_instance(config, self.mode).0)
    }
}

/// A persistent config with short, test-friendly durations.
pub fn test_config(timeout_ms: u64, ttl_ms: u64, idle_timeout_ms: u64) -> WorkerConfig {
    WorkerConfig {
        timeout_ms,
        ttl_ms,
        idle_timeout_ms,
        ..WorkerConfig::default()
    }
}
