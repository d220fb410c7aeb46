use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::instance::WorkerStats;

/// Slots in the response-time ring.
const RING_SLOTS: usize = 100;

/// Pool-level counters and per-key accumulators. Everything on the hot path
/// is an atomic increment or a bounded-buffer write under a short lock.
pub struct PoolMetrics {
    workers_created: AtomicU64,
    workers_retired: AtomicU64,
    workers_failed: AtomicU64,
    evictions: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    requests: AtomicU64,
    response_times: Mutex<ResponseTimeRing>,
    historical: Mutex<HashMap<String, HistoricalStats>>,
    ephemeral: Mutex<HashMap<String, EphemeralStats>>,
    started_at: Mutex<Instant>,
}

/// Circular buffer of the last hundred request durations.
struct ResponseTimeRing {
    slots: [f64; RING_SLOTS],
    next: usize,
    recorded: u64,
}

impl ResponseTimeRing {
    fn new() -> Self {
        Self {
            slots: [0.0; RING_SLOTS],
            next: 0,
            recorded: 0,
        }
    }

    fn record(&mut self, duration_ms: f64) {
        self.slots[self.next] = duration_ms;
        self.next = (self.next + 1) % RING_SLOTS;
        self.recorded += 1;
    }

    fn mean(&self) -> f64 {
        let count = (self.recorded as usize).min(RING_SLOTS);
        if count == 0 {
            return 0.0;
        }
        self.slots[..count].iter().sum::<f64>() / count as f64
    }
}

/// Totals carried over from retired workers, per pool key.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalStats {
    pub request_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: f64,
    pub workers: u64,
}

/// Rolling summary for ephemeral (one-shot) workers of a key.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralStats {
    /// Since the last document or API request.
    pub session: EphemeralScope,
    /// Since pool start (or `reset`).
    pub cumulative: EphemeralScope,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralScope {
    pub requests: u64,
    pub total_response_time_ms: f64,
}

impl EphemeralScope {
    fn record(&mut self, duration_ms: f64) {
        self.requests += 1;
        self.total_response_time_ms += duration_ms;
    }
}

/// Read-only view composed for the stats API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub workers_created: u64,
    pub workers_retired: u64,
    pub workers_failed: u64,
    pub evictions: u64,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub requests_per_second: f64,
    pub uptime_ms: u64,
    pub memory_usage_mb: f64,
    pub active_workers: usize,
    pub historical: HashMap<String, HistoricalStats>,
    pub ephemeral: HashMap<String, EphemeralStats>,
    pub timestamp: DateTime<Utc>,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self {
            workers_created: AtomicU64::new(0),
            workers_retired: AtomicU64::new(0),
            workers_failed: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            response_times: Mutex::new(ResponseTimeRing::new()),
            historical: Mutex::new(HashMap::new()),
            ephemeral: Mutex::new(HashMap::new()),
            started_at: Mutex::new(Instant::now()),
        }
    }

    pub fn record_worker_created(&self) {
        self.workers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_retired(&self) {
        self.workers_retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_failed(&self) {
        self.workers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// One served request with its duration.
    pub fn record_request(&self, duration_ms: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.response_times.lock().record(duration_ms);
    }

    /// Fold a retired worker's totals into the historical map.
    pub fn accumulate_worker(&self, key: &str, stats: &WorkerStats) {
        let mut historical = self.historical.lock();
        let entry = historical.entry(key.to_string()).or_default();
        entry.request_count += stats.request_count;
        entry.error_count += stats.error_count;
        entry.total_response_time_ms += stats.total_response_time_ms;
        entry.workers += 1;
    }

    /// Track one ephemeral worker run. Document and API requests start a new
    /// session scope; the cumulative scope always accrues.
    pub fn record_ephemeral(
        &self,
        key: &str,
        duration_ms: f64,
        is_document_request: bool,
        is_api_request: bool,
    ) {
        let mut ephemeral = self.ephemeral.lock();
        let entry = ephemeral.entry(key.to_string()).or_default();
        if is_document_request || is_api_request {
            entry.session = EphemeralScope::default();
        }
        entry.session.record(duration_ms);
        entry.cumulative.record(duration_ms);
    }

    pub fn total_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn workers_created(&self) -> u64 {
        self.workers_created.load(Ordering::Relaxed)
    }

    pub fn workers_retired(&self) -> u64 {
        self.workers_retired.load(Ordering::Relaxed)
    }

    /// Compose the read-only snapshot.
    pub fn snapshot(&self, active_workers: usize) -> MetricsSnapshot {
        let uptime = self.started_at.lock().elapsed();
        let total_requests = self.requests.load(Ordering::Relaxed);
        let requests_per_second = if uptime.as_secs_f64() > 0.0 {
            total_requests as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };

        MetricsSnapshot {
            workers_created: self.workers_created.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
            workers_failed: self.workers_failed.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            total_requests,
            avg_response_time_ms: self.response_times.lock().mean(),
            requests_per_second,
            uptime_ms: uptime.as_millis() as u64,
            memory_usage_mb: process_memory_mb(),
            active_workers,
            historical: self.historical.lock().clone(),
            ephemeral: self.ephemeral.lock().clone(),
            timestamp: Utc::now(),
        }
    }

    /// Zero everything and restart the uptime clock.
    pub fn reset(&self) {
        self.workers_created.store(0, Ordering::Relaxed);
        self.workers_retired.store(0, Ordering::Relaxed);
        self.workers_failed.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.requests.store(0, Ordering::Relaxed);
        *self.response_times.lock() = ResponseTimeRing::new();
        self.historical.lock().clear();
        self.ephemeral.lock().clear();
        *self.started_at.lock() = Instant::now();
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident memory of this process in MiB, via sysinfo.
fn process_memory_mb() -> f64 {
    let mut system = sysinfo::System::new();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0.0;
    };
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_over_recorded_samples() {
        let metrics = PoolMetrics::new();
        for ms in [100.0, 200.0, 300.0] {
            metrics.record_request(ms);
        }
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.avg_response_time_ms, 200.0);
        assert_eq!(snapshot.total_requests, 3);
    }

    #[test]
    fn ring_keeps_the_last_hundred() {
        let metrics = PoolMetrics::new();
        for _ in 0..150 {
            metrics.record_request(10.0);
        }
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.avg_response_time_ms, 10.0);
        assert_eq!(snapshot.total_requests, 150);
    }

    #[test]
    fn ring_overwrites_oldest_slots() {
        let metrics = PoolMetrics::new();
        // 100 slow samples displaced by 100 fast ones.
        for _ in 0..100 {
            metrics.record_request(1000.0);
        }
        for _ in 0..100 {
            metrics.record_request(10.0);
        }
        assert_eq!(metrics.snapshot(0).avg_response_time_ms, 10.0);
    }

    #[test]
    fn historical_accumulates_across_workers() {
        let metrics = PoolMetrics::new();
        let stats = WorkerStats {
            age_ms: 1_000,
            idle_ms: 0,
            status: "active".into(),
            request_count: 5,
            error_count: 1,
            total_response_time_ms: 50.0,
            avg_response_time_ms: 10.0,
        };
        metrics.accumulate_worker("key-a", &stats);
        metrics.accumulate_worker("key-a", &stats);

        let snapshot = metrics.snapshot(0);
        let entry = &snapshot.historical["key-a"];
        assert_eq!(entry.request_count, 10);
        assert_eq!(entry.error_count, 2);
        assert_eq!(entry.workers, 2);
    }

    #[test]
    fn ephemeral_session_resets_on_document_requests() {
        let metrics = PoolMetrics::new();
        metrics.record_ephemeral("key-a", 5.0, true, false);
        metrics.record_ephemeral("key-a", 5.0, false, false); // asset
        metrics.record_ephemeral("key-a", 5.0, false, false); // asset

        {
            let snapshot = metrics.snapshot(0);
            let entry = &snapshot.ephemeral["key-a"];
            assert_eq!(entry.session.requests, 3);
            assert_eq!(entry.cumulative.requests, 3);
        }

        // A new document request starts a fresh session.
        metrics.record_ephemeral("key-a", 5.0, true, false);
        let snapshot = metrics.snapshot(0);
        let entry = &snapshot.ephemeral["key-a"];
        assert_eq!(entry.session.requests, 1);
        assert_eq!(entry.cumulative.requests, 4);
    }

    #[test]
    fn reset_clears_counters_and_uptime() {
        let metrics = PoolMetrics::new();
        metrics.record_request(10.0);
        metrics.record_worker_created();
        metrics.reset();
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.workers_created, 0);
        assert_eq!(snapshot.avg_response_time_ms, 0.0);
    }
}
