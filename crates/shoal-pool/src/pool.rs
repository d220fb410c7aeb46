use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use shoal_config::WorkerConfig;
use shoal_ipc::{IpcRequest, IpcResponse};

use crate::error::PoolError;
use crate::instance::{WorkerInstance, DEFAULT_TERMINATE_GRACE};
use crate::key::pool_key;
use crate::metrics::{MetricsSnapshot, PoolMetrics};

/// Pool construction parameters. There is no process-wide default pool; the
/// server builds one explicitly and hands it around.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Cap on live persistent workers across all keys.
    pub max_pool_size: usize,
    /// Cadence of the background health sweep.
    pub sweep_interval: Duration,
    /// Grace between TERMINATE and the hard kill.
    pub terminate_grace: Duration,
    /// Program spawned for each worker.
    pub worker_program: PathBuf,
    /// Arguments handed to the worker program.
    pub worker_args: Vec<String>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: num_cpus::get().max(4),
            sweep_interval: Duration::from_secs(10),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            worker_program: std::env::current_exe()
                .unwrap_or_else(|_| PathBuf::from("shoal")),
            worker_args: vec!["worker".to_string()],
        }
    }
}

/// Seam for worker creation. Production spawns subprocesses; tests plug in
/// in-process workers over duplex pipes.
pub trait WorkerSpawner: Send + Sync + 'static {
    fn spawn(&self, app_dir: &Path, config: &WorkerConfig) -> Result<WorkerInstance, PoolError>;
}

/// Spawns real worker subprocesses.
pub struct ProcessSpawner {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, app_dir: &Path, config: &WorkerConfig) -> Result<WorkerInstance, PoolError> {
        WorkerInstance::spawn_process(app_dir, config, &self.program, &self.args)
    }
}

type CreationFuture = Shared<BoxFuture<'static, Result<Arc<WorkerInstance>, PoolError>>>;

/// Keyed cache of live worker instances.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    options: PoolOptions,
    spawner: Arc<dyn WorkerSpawner>,
    entries: Mutex<HashMap<String, Arc<WorkerInstance>>>,
    creating: Mutex<HashMap<String, CreationFuture>>,
    metrics: Arc<PoolMetrics>,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(options: PoolOptions) -> Self {
        let spawner = Arc::new(ProcessSpawner {
            program: options.worker_program.clone(),
            args: options.worker_args.clone(),
        });
        Self::with_spawner(options, spawner)
    }

    pub fn with_spawner(options: PoolOptions, spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                options,
                spawner,
                entries: Mutex::new(HashMap::new()),
                creating: Mutex::new(HashMap::new()),
                metrics: Arc::new(PoolMetrics::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Dispatch one request to the worker for (`app_dir`, `config`).
    ///
    /// Persistent configs reuse a cached healthy instance or join the
    /// in-flight creation for their key; ephemeral configs get a fresh
    /// one-shot worker.
    pub async fn fetch(
        &self,
        app_dir: &Path,
        config: &WorkerConfig,
        req: IpcRequest,
    ) -> Result<IpcResponse, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        if config.is_ephemeral() {
            return self.fetch_ephemeral(app_dir, config, req).await;
        }

        let key = pool_key(app_dir, config);
        let instance = self.checkout(&key, app_dir, config).await?;

        let started = Instant::now();
        let result = instance.fetch(req).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

        if result.is_ok() {
            self.inner.metrics.record_request(elapsed_ms);
            instance.record_response_time(elapsed_ms);
        }

        // Post-response health check: a worker that crossed a limit while
        // serving is retired immediately instead of at the next sweep. Only
        // our own entry is removed; a replacement that raced in stays.
        if !instance.is_healthy() {
            let removed = {
                let mut entries = self.inner.entries.lock();
                match entries.get(&key) {
                    Some(current) if Arc::ptr_eq(current, &instance) => entries.remove(&key),
                    _ => None,
                }
            };
            if let Some(removed) = removed {
                self.inner.retire(&key, &removed);
            }
        }

        result
    }

    /// Get the healthy cached instance for `key`, or join/start its
    /// creation. At most one spawn per key runs at a time; concurrent cold
    /// requests share it.
    async fn checkout(
        &self,
        key: &str,
        app_dir: &Path,
        config: &WorkerConfig,
    ) -> Result<Arc<WorkerInstance>, PoolError> {
        let stale = {
            let mut entries = self.inner.entries.lock();
            match entries.get(key) {
                Some(instance) if instance.is_healthy() => {
                    instance.touch();
                    self.inner.metrics.record_hit();
                    return Ok(instance.clone());
                }
                Some(_) => entries.remove(key),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(key = %key, worker_id = %stale.id(), "replacing unhealthy worker");
            self.inner.retire(key, &stale);
        }

        let creation = {
            let mut creating = self.inner.creating.lock();
            match creating.get(key) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    self.inner.metrics.record_miss();
                    let future =
                        creation_future(self.inner.clone(), key.to_string(), app_dir, config);
                    creating.insert(key.to_string(), future.clone());
                    future
                }
            }
        };

        let result = creation.clone().await;
        {
            // Only drop our own creation entry; a newer in-flight creation
            // for the same key stays.
            let mut creating = self.inner.creating.lock();
            if creating.get(key).is_some_and(|current| current.ptr_eq(&creation)) {
                creating.remove(key);
            }
        }
        result
    }

    async fn fetch_ephemeral(
        &self,
        app_dir: &Path,
        config: &WorkerConfig,
        req: IpcRequest,
    ) -> Result<IpcResponse, PoolError> {
        let key = pool_key(app_dir, config);
        self.inner.metrics.record_miss();

        let instance = self
            .inner
            .spawner
            .spawn(app_dir, config)
            .map(Arc::new)
            .map_err(|e| {
                self.inner.metrics.record_worker_failed();
                e
            })?;
        self.inner.metrics.record_worker_created();
        debug!(worker_id = %instance.id(), key = %key, "ephemeral worker created");

        let is_document = is_document_request(&req);
        let is_api = is_api_request(&req);

        let started = Instant::now();
        let result = instance.fetch(req).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

        if result.is_ok() {
            self.inner.metrics.record_request(elapsed_ms);
            instance.record_response_time(elapsed_ms);
        }
        self.inner
            .metrics
            .record_ephemeral(&key, elapsed_ms, is_document, is_api);
        self.inner.metrics.record_worker_retired();

        let grace = self.inner.options.terminate_grace;
        tokio::spawn(async move {
            instance.terminate(grace).await;
        });

        result
    }

    /// Start the periodic health sweep. The task stops when the pool is
    /// dropped or shut down.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.options.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                inner.sweep();
            }
        })
    }

    /// Number of live cached workers.
    pub fn active_workers(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        self.inner.metrics.clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.active_workers())
    }

    /// Stop admitting requests, then terminate every live worker
    /// concurrently.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries: Vec<(String, Arc<WorkerInstance>)> =
            self.inner.entries.lock().drain().collect();

        let snapshot = self.inner.metrics.snapshot(entries.len());
        info!(
            total_requests = snapshot.total_requests,
            workers_created = snapshot.workers_created,
            workers_retired = snapshot.workers_retired,
            live_workers = entries.len(),
            "pool shutting down"
        );

        for (key, instance) in &entries {
            self.inner.metrics.accumulate_worker(key, &instance.stats());
            self.inner.metrics.record_worker_retired();
        }
        let grace = self.inner.options.terminate_grace;
        futures::future::join_all(
            entries
                .iter()
                .map(|(_, instance)| instance.terminate(grace)),
        )
        .await;
    }
}

impl PoolInner {
    /// Accumulate a retiring instance into history and terminate it in the
    /// background.
    fn retire(&self, key: &str, instance: &Arc<WorkerInstance>) {
        self.metrics.accumulate_worker(key, &instance.stats());
        self.metrics.record_worker_retired();
        let instance = instance.clone();
        let grace = self.options.terminate_grace;
        tokio::spawn(async move {
            instance.terminate(grace).await;
        });
    }

    /// Evict the least-recently-used entry if the pool is at capacity.
    /// Idle entries are preferred victims; failing that, the oldest active
    /// one goes and its in-flight requests surface as worker errors.
    fn make_room(&self) {
        let evicted = {
            let mut entries = self.entries.lock();
            if entries.len() < self.options.max_pool_size {
                return;
            }
            let victim = entries
                .iter()
                .min_by_key(|(_, instance)| {
                    let idle_ms = instance.last_used_at().elapsed().as_millis() as u64;
                    let is_active = idle_ms < instance.config().idle_timeout_ms;
                    (is_active, instance.last_used_at())
                })
                .map(|(key, _)| key.clone());
            victim.and_then(|key| entries.remove(&key).map(|instance| (key, instance)))
        };

        if let Some((key, instance)) = evicted {
            warn!(key = %key, worker_id = %instance.id(), "pool at capacity, evicting LRU worker");
            self.metrics.record_eviction();
            self.retire(&key, &instance);
        }
    }

    /// Retire entries that became unhealthy while sitting in the cache and
    /// deliver idle signals for entries that crossed the idle threshold.
    fn sweep(&self) {
        let stale: Vec<(String, Arc<WorkerInstance>)> = {
            let mut entries = self.entries.lock();
            for instance in entries.values() {
                // Sends IDLE once per idle transition as a side effect.
                let _ = instance.status();
            }
            let stale_keys: Vec<String> = entries
                .iter()
                .filter(|(_, instance)| !instance.is_healthy())
                .map(|(key, _)| key.clone())
                .collect();
            stale_keys
                .into_iter()
                .filter_map(|key| entries.remove(&key).map(|instance| (key, instance)))
                .collect()
        };

        for (key, instance) in stale {
            debug!(key = %key, worker_id = %instance.id(), "sweep retiring unhealthy worker");
            self.retire(&key, &instance);
        }
    }
}

/// The shared spawn future for one key. Capacity is made before the spawn;
/// the new entry is cached before any waiter proceeds.
fn creation_future(
    inner: Arc<PoolInner>,
    key: String,
    app_dir: &Path,
    config: &WorkerConfig,
) -> CreationFuture {
    let app_dir = app_dir.to_path_buf();
    let config = config.clone();
    async move {
        inner.make_room();
        let instance = inner
            .spawner
            .spawn(&app_dir, &config)
            .map(Arc::new)
            .map_err(|e| {
                inner.metrics.record_worker_failed();
                warn!(key = %key, error = %e, "worker creation failed");
                e
            })?;
        info!(worker_id = %instance.id(), key = %key, "worker created");
        inner.entries.lock().insert(key, instance.clone());
        inner.metrics.record_worker_created();
        Ok(instance)
    }
    .boxed()
    .shared()
}

fn is_document_request(req: &IpcRequest) -> bool {
    req.header("accept")
        .is_some_and(|accept| accept.contains("text/html"))
}

fn is_api_request(req: &IpcRequest) -> bool {
    let path = req.url.split(['?', '#']).next().unwrap_or("");
    path == "/api"
        || path.starts_with("/api/")
        || req
            .header("accept")
            .is_some_and(|accept| accept.starts_with("application/json"))
}
