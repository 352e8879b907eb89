//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (milliseconds)
/// Buckets: ≤1, ≤2, ≤4, ≤8, ≤16, ≤32, ≤64, ≤128, ≤256, ≤512, >512
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [1, 2, 4, 8, 16, 32, 64, 128, 256, 512];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

#[derive(Default)]
pub struct Metrics {
    frames_total: AtomicU64,
    frames_since_report: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    markers_observed: AtomicU64,

    frame_latency_sum_ms: AtomicU64,
    frame_latency_count: AtomicU64,
    frame_latency_max_ms: AtomicU64,
    frame_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],

    sessions_started: AtomicU64,
    checkins: AtomicU64,
    checkins_denied: AtomicU64,
    checkouts: AtomicU64,
    checkouts_denied: AtomicU64,

    reports_ok: AtomicU64,
    reports_failed: AtomicU64,
    reports_dropped: AtomicU64,

    collector_active: AtomicU64,

    last_report: Mutex<Option<Instant>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_processed(&self, marker_count: usize) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.markers_observed.fetch_add(marker_count as u64, Ordering::Relaxed);
    }

    pub fn record_frame_latency(&self, latency_ms: u64) {
        self.frame_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.frame_latency_count.fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.frame_latency_max_ms, latency_ms);
        self.frame_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_start(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkin(&self) {
        self.checkins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkin_denied(&self) {
        self.checkins_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkout_denied(&self) {
        self.checkouts_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_ok(&self) {
        self.reports_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_failed(&self) {
        self.reports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report_dropped(&self) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_collector_active(&self, active: bool) {
        self.collector_active.store(active as u64, Ordering::Relaxed);
    }

    /// Snapshot all counters; resets the frames-per-second window
    pub fn report(&self) -> MetricsSummary {
        let frames_window = self.frames_since_report.swap(0, Ordering::Relaxed);
        let frames_per_sec = {
            let mut last = self.last_report.lock();
            let now = Instant::now();
            let elapsed = last.map(|t| now.duration_since(t).as_secs_f64()).unwrap_or(0.0);
            *last = Some(now);
            if elapsed > 0.0 {
                frames_window as f64 / elapsed
            } else {
                0.0
            }
        };

        let latency_count = self.frame_latency_count.load(Ordering::Relaxed);
        let frame_latency_avg_ms = if latency_count > 0 {
            self.frame_latency_sum_ms.load(Ordering::Relaxed) / latency_count
        } else {
            0
        };
        let frame_latency_buckets = load_buckets(&self.frame_latency_buckets);

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_per_sec,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            markers_observed: self.markers_observed.load(Ordering::Relaxed),
            frame_latency_avg_ms,
            frame_latency_max_ms: self.frame_latency_max_ms.load(Ordering::Relaxed),
            frame_latency_p50_ms: percentile_from_buckets(&frame_latency_buckets, 0.50),
            frame_latency_p95_ms: percentile_from_buckets(&frame_latency_buckets, 0.95),
            frame_latency_p99_ms: percentile_from_buckets(&frame_latency_buckets, 0.99),
            frame_latency_buckets,
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            checkins: self.checkins.load(Ordering::Relaxed),
            checkins_denied: self.checkins_denied.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            checkouts_denied: self.checkouts_denied.load(Ordering::Relaxed),
            reports_ok: self.reports_ok.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            collector_active: self.collector_active.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub markers_observed: u64,
    pub frame_latency_avg_ms: u64,
    pub frame_latency_max_ms: u64,
    pub frame_latency_p50_ms: u64,
    pub frame_latency_p95_ms: u64,
    pub frame_latency_p99_ms: u64,
    pub frame_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub sessions_started: u64,
    pub checkins: u64,
    pub checkins_denied: u64,
    pub checkouts: u64,
    pub checkouts_denied: u64,
    pub reports_ok: u64,
    pub reports_failed: u64,
    pub reports_dropped: u64,
    pub collector_active: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = %format!("{:.1}", self.frames_per_sec),
            frames_dropped = %self.frames_dropped,
            markers_observed = %self.markers_observed,
            frame_latency_avg_ms = %self.frame_latency_avg_ms,
            frame_latency_p99_ms = %self.frame_latency_p99_ms,
            sessions_started = %self.sessions_started,
            checkins = %self.checkins,
            checkouts = %self.checkouts,
            reports_ok = %self.reports_ok,
            reports_failed = %self.reports_failed,
            collector_active = %(self.collector_active == 1),
            "metrics_report"
        );
    }
}
