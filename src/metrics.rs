//! In-process accumulators backing the `health()` operation (spec.md §6
//! `health` row: `{status, queries.{p50,p95,p99,throughput}, cache.hitRate,
//! snapshot.ageSeconds, errors.last5m}`).
//!
//! No metrics-export crate is pulled in (spec.md scopes dashboards/metrics
//! export out) — these are plain accumulator structs in the teacher's
//! `commands::stake_snapshot`/`migration_*` style, read synchronously by
//! `health()` rather than pushed anywhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bound on how many recent request latencies are retained for the
/// percentile estimate; older samples are dropped FIFO.
const LATENCY_WINDOW: usize = 4096;

/// Bound on how long an error timestamp is kept for the `errors.last5m`
/// count before it ages out.
const ERROR_WINDOW: Duration = Duration::from_secs(300);

/// Overall service health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Serving normally.
    Healthy,
    /// Serving, but with elevated error rate or latency.
    Degraded,
    /// Not serving (e.g. no active snapshot).
    Unhealthy,
}

/// Snapshot of accumulated metrics, as returned by [`Metrics::snapshot`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall classification.
    pub status: HealthStatus,
    /// 50th percentile request latency, in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile request latency, in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile request latency, in milliseconds.
    pub p99_ms: f64,
    /// Requests served per second over the retained window.
    pub throughput_per_sec: f64,
    /// Cache hit rate (PIP resolver cache), 0.0–1.0.
    pub cache_hit_rate: f64,
    /// Age of the active snapshot, in seconds.
    pub snapshot_age_seconds: u64,
    /// Errors recorded in the trailing 5-minute window.
    pub errors_last_5m: usize,
}

struct LatencySamples {
    window: VecDeque<Duration>,
    started_at: Instant,
}

/// Accumulates request latencies, cache hits/misses, and error timestamps.
pub struct Metrics {
    latencies: Mutex<LatencySamples>,
    errors: Mutex<VecDeque<Instant>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    requests_served: AtomicU64,
}

impl Metrics {
    /// Builds an empty accumulator.
    pub fn new() -> Self {
        Metrics {
            latencies: Mutex::new(LatencySamples { window: VecDeque::new(), started_at: Instant::now() }),
            errors: Mutex::new(VecDeque::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
        }
    }

    /// Records one completed request's latency.
    pub fn record_latency(&self, latency: Duration) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        let mut samples = self.latencies.lock().expect("latency lock poisoned");
        samples.window.push_back(latency);
        if samples.window.len() > LATENCY_WINDOW {
            samples.window.pop_front();
        }
    }

    /// Records a cache hit or miss for the hit-rate gauge.
    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an error occurrence, timestamped now.
    pub fn record_error(&self) {
        let mut errors = self.errors.lock().expect("error log poisoned");
        errors.push_back(Instant::now());
    }

    fn percentile(sorted: &[u128], pct: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        sorted[rank.min(sorted.len() - 1)] as f64
    }

    /// Computes a [`HealthReport`] from the accumulated state. `snapshot_age`
    /// and `has_active_snapshot` come from the synchronizer, which owns
    /// that state; metrics doesn't track snapshots itself.
    pub fn snapshot(&self, snapshot_age: Duration, has_active_snapshot: bool) -> HealthReport {
        let mut samples = self.latencies.lock().expect("latency lock poisoned");
        let mut millis: Vec<u128> = samples.window.iter().map(|d| d.as_millis()).collect();
        millis.sort_unstable();
        let elapsed = samples.started_at.elapsed().as_secs_f64().max(1e-9);
        let throughput = self.requests_served.load(Ordering::Relaxed) as f64 / elapsed;
        if samples.window.len() >= LATENCY_WINDOW {
            samples.started_at = Instant::now();
        }
        drop(samples);

        let mut errors = self.errors.lock().expect("error log poisoned");
        let cutoff = Instant::now() - ERROR_WINDOW;
        while matches!(errors.front(), Some(ts) if *ts < cutoff) {
            errors.pop_front();
        }
        let errors_last_5m = errors.len();

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_hit_rate = if hits + misses == 0 { 0.0 } else { hits as f64 / (hits + misses) as f64 };

        let status = if !has_active_snapshot {
            HealthStatus::Unhealthy
        } else if errors_last_5m > 50 || Self::percentile(&millis, 0.95) > 50.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            p50_ms: Self::percentile(&millis, 0.50),
            p95_ms: Self::percentile(&millis, 0.95),
            p99_ms: Self::percentile(&millis, 0.99),
            throughput_per_sec: throughput,
            cache_hit_rate,
            snapshot_age_seconds: snapshot_age.as_secs(),
            errors_last_5m,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
