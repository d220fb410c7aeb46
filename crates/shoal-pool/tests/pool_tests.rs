mod support;

use std::path::Path;
use std::time::{Duration, Instant};

use shoal_ipc::IpcRequest;
use shoal_pool::{PoolError, PoolOptions, WorkerPool};
use support::{test_config, MockMode, MockSpawner};

fn options(max_pool_size: usize) -> PoolOptions {
    PoolOptions {
        max_pool_size,
        sweep_interval: Duration::from_millis(50),
        terminate_grace: Duration::from_millis(10),
        ..PoolOptions::default()
    }
}

#[tokio::test]
async fn concurrent_cold_fetches_spawn_exactly_one_worker() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner.clone());
    let config = test_config(5_000, 60_000, 30_000);
    let app_dir = Path::new("/apps/x");

    let futures: Vec<_> = (0..10)
        .map(|_| {
            let pool = pool.clone();
            let config = config.clone();
            async move { pool.fetch(app_dir, &config, IpcRequest::new("GET", "/x")).await }
        })
        .collect();
    let results = futures::future::join_all(futures).await;

    let bodies: Vec<Vec<u8>> = results
        .into_iter()
        .map(|r| r.expect("fetch succeeds").body)
        .collect();
    assert!(bodies.iter().all(|b| b == &bodies[0]), "one worker served all");

    assert_eq!(spawner.spawn_count(), 1);
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.workers_created, 1);
    assert_eq!(snapshot.total_requests, 10);
    assert_eq!(snapshot.misses, 1);
}

#[tokio::test]
async fn ephemeral_workers_are_one_per_request() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner.clone());
    let config = test_config(5_000, 0, 30_000);
    let app_dir = Path::new("/apps/eph");

    let first = pool
        .fetch(app_dir, &config, IpcRequest::new("GET", "/a"))
        .await
        .unwrap();
    let second = pool
        .fetch(app_dir, &config, IpcRequest::new("GET", "/b"))
        .await
        .unwrap();

    assert_ne!(first.body, second.body, "distinct worker ids");
    assert_eq!(spawner.spawn_count(), 2);
    assert_eq!(pool.active_workers(), 0, "ephemeral workers are never cached");

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.workers_created, 2);
    assert_eq!(snapshot.workers_retired, 2);
    assert!(!snapshot.ephemeral.is_empty());
}

#[tokio::test]
async fn persistent_workers_are_reused() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner.clone());
    let config = test_config(5_000, 60_000, 30_000);
    let app_dir = Path::new("/apps/persist");

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let res = pool
            .fetch(app_dir, &config, IpcRequest::new("GET", "/"))
            .await
            .unwrap();
        bodies.push(res.body);
    }

    assert!(bodies.iter().all(|b| b == &bodies[0]));
    assert_eq!(spawner.spawn_count(), 1);
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.hits, 3);
    assert_eq!(snapshot.misses, 1);
}

#[tokio::test]
async fn max_requests_recycles_the_worker() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner.clone());
    let mut config = test_config(5_000, 60_000, 30_000);
    config.max_requests = 3;
    let app_dir = Path::new("/apps/recycle");

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let res = pool
            .fetch(app_dir, &config, IpcRequest::new("GET", "/"))
            .await
            .unwrap();
        bodies.push(res.body);
    }

    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    assert_ne!(bodies[2], bodies[3], "fourth request gets a fresh worker");
    assert_eq!(spawner.spawn_count(), 2);
    assert!(pool.snapshot().workers_retired >= 1);
}

#[tokio::test]
async fn capacity_evicts_the_lru_entry() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(2), spawner.clone());
    let config = test_config(5_000, 60_000, 30_000);

    for dir in ["/apps/a", "/apps/b", "/apps/c"] {
        pool.fetch(Path::new(dir), &config, IpcRequest::new("GET", "/"))
            .await
            .unwrap();
    }

    assert_eq!(pool.active_workers(), 2);
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.evictions, 1);
    assert_eq!(snapshot.workers_retired, 1);
    // The evicted worker's totals moved into history.
    let historical_requests: u64 = snapshot
        .historical
        .values()
        .map(|h| h.request_count)
        .sum();
    assert_eq!(historical_requests, 1);
}

#[tokio::test]
async fn timeouts_surface_with_the_configured_deadline() {
    let spawner = MockSpawner::new(MockMode::Silent);
    let pool = WorkerPool::with_spawner(options(8), spawner);
    let config = test_config(200, 60_000, 30_000);
    let app_dir = Path::new("/apps/slow");

    let started = Instant::now();
    let err = pool
        .fetch(app_dir, &config, IpcRequest::new("GET", "/"))
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::Timeout { timeout_ms: 200 }));
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test]
async fn spawn_failures_are_counted_and_surfaced() {
    let spawner = MockSpawner::new(MockMode::FailSpawn);
    let pool = WorkerPool::with_spawner(options(8), spawner);
    let config = test_config(5_000, 60_000, 30_000);

    let err = pool
        .fetch(Path::new("/apps/bad"), &config, IpcRequest::new("GET", "/"))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Spawn { .. }));

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.workers_failed, 1);
    assert_eq!(snapshot.workers_created, 0);
    assert_eq!(pool.active_workers(), 0);
}

#[tokio::test]
async fn sweep_retires_workers_that_idle_out() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner);
    // Health window: idles out 100ms after last use.
    let config = test_config(50, 60_000, 100);
    let app_dir = Path::new("/apps/idler");

    pool.fetch(app_dir, &config, IpcRequest::new("GET", "/"))
        .await
        .unwrap();
    assert_eq!(pool.active_workers(), 1);

    let sweeper = pool.spawn_sweeper();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(pool.active_workers(), 0);
    assert_eq!(pool.snapshot().workers_retired, 1);
    sweeper.abort();
}

#[tokio::test]
async fn shutdown_stops_admission_and_drains_workers() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner);
    let config = test_config(5_000, 60_000, 30_000);
    let app_dir = Path::new("/apps/drain");

    pool.fetch(app_dir, &config, IpcRequest::new("GET", "/"))
        .await
        .unwrap();
    assert_eq!(pool.active_workers(), 1);

    pool.shutdown().await;
    assert_eq!(pool.active_workers(), 0);

    let err = pool
        .fetch(app_dir, &config, IpcRequest::new("GET", "/"))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Closed));
    assert_eq!(pool.snapshot().workers_retired, 1);
}

#[tokio::test]
async fn changed_config_gets_its_own_worker() {
    let spawner = MockSpawner::new(MockMode::Echo);
    let pool = WorkerPool::with_spawner(options(8), spawner.clone());
    let app_dir = Path::new("/apps/same");

    let a = test_config(5_000, 60_000, 30_000);
    let mut b = a.clone();
    b.env.insert("FLAG".into(), "on".into());

    let first = pool
        .fetch(app_dir, &a, IpcRequest::new("GET", "/"))
        .await
        .unwrap();
    let second = pool
        .fetch(app_dir, &b, IpcRequest::new("GET", "/"))
        .await
        .unwrap();

    assert_ne!(first.body, second.body);
    assert_eq!(spawner.spawn_count(), 2);
    assert_eq!(pool.active_workers(), 2);
}
