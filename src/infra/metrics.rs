//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.
//! The gate's own state lives in `services::gate`.

use crate::domain::types::DecisionStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for pipeline latency (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total uploads accepted by the pipeline (monotonic)
    uploads_total: AtomicU64,
    /// Uploads since last report (reset on report)
    uploads_since_report: AtomicU64,
    granted_total: AtomicU64,
    denied_total: AtomicU64,
    failed_total: AtomicU64,
    /// Decisions aborted because the registry was unreachable
    registry_errors_total: AtomicU64,
    /// Gate open triggers, automatic and manual (monotonic)
    gate_triggers_total: AtomicU64,
    /// Auto-close timers that actually closed the gate
    gate_auto_closes_total: AtomicU64,
    /// Current gate state (0=closed, 1=open)
    gate_open: AtomicU64,
    /// Detector unavailable or inference failed
    detector_failures_total: AtomicU64,
    ocr_requests_total: AtomicU64,
    /// OCR timeouts and service errors
    ocr_failures_total: AtomicU64,
    /// Pipeline latency histogram (ms, reset on report)
    pipeline_latency_buckets: [AtomicU64; NUM_BUCKETS],
    pipeline_latency_sum_ms: AtomicU64,
    pipeline_latency_max_ms: AtomicU64,
    /// Lifetime latency histogram for the scrape endpoint (never reset)
    lifetime_latency_buckets: [AtomicU64; NUM_BUCKETS],
    lifetime_latency_sum_ms: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            uploads_total: AtomicU64::new(0),
            uploads_since_report: AtomicU64::new(0),
            granted_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            registry_errors_total: AtomicU64::new(0),
            gate_triggers_total: AtomicU64::new(0),
            gate_auto_closes_total: AtomicU64::new(0),
            gate_open: AtomicU64::new(0),
            detector_failures_total: AtomicU64::new(0),
            ocr_requests_total: AtomicU64::new(0),
            ocr_failures_total: AtomicU64::new(0),
            pipeline_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            pipeline_latency_sum_ms: AtomicU64::new(0),
            pipeline_latency_max_ms: AtomicU64::new(0),
            lifetime_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            lifetime_latency_sum_ms: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one pipeline run with its wall-clock latency
    #[inline]
    pub fn record_upload(&self, latency_ms: u64) {
        self.uploads_total.fetch_add(1, Ordering::Relaxed);
        self.uploads_since_report.fetch_add(1, Ordering::Relaxed);
        self.pipeline_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let bucket = bucket_index(latency_ms);
        self.pipeline_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.lifetime_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.lifetime_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);

        update_atomic_max(&self.pipeline_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_decision(&self, status: DecisionStatus) {
        let counter = match status {
            DecisionStatus::Granted => &self.granted_total,
            DecisionStatus::Denied => &self.denied_total,
            DecisionStatus::Failed => &self.failed_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_registry_error(&self) {
        self.registry_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_trigger(&self) {
        self.gate_triggers_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_auto_close(&self) {
        self.gate_auto_closes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_gate_open(&self, open: bool) {
        self.gate_open.store(u64::from(open), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detector_failure(&self) {
        self.detector_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ocr_request(&self, failed: bool) {
        self.ocr_requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.ocr_failures_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn uploads_total(&self) -> u64 {
        self.uploads_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn gate_triggers_total(&self) -> u64 {
        self.gate_triggers_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn gate_auto_closes_total(&self) -> u64 {
        self.gate_auto_closes_total.load(Ordering::Relaxed)
    }

    /// Monotonic counters and the lifetime latency histogram, without
    /// touching the periodic report state
    pub fn snapshot(&self) -> ScrapeSnapshot {
        let mut latency_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.lifetime_latency_buckets.iter().enumerate() {
            latency_buckets[i] = bucket.load(Ordering::Relaxed);
        }

        ScrapeSnapshot {
            uploads_total: self.uploads_total.load(Ordering::Relaxed),
            granted_total: self.granted_total.load(Ordering::Relaxed),
            denied_total: self.denied_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            registry_errors_total: self.registry_errors_total.load(Ordering::Relaxed),
            gate_triggers_total: self.gate_triggers_total.load(Ordering::Relaxed),
            gate_auto_closes_total: self.gate_auto_closes_total.load(Ordering::Relaxed),
            gate_open: self.gate_open.load(Ordering::Relaxed),
            detector_failures_total: self.detector_failures_total.load(Ordering::Relaxed),
            ocr_requests_total: self.ocr_requests_total.load(Ordering::Relaxed),
            ocr_failures_total: self.ocr_failures_total.load(Ordering::Relaxed),
            latency_buckets,
            latency_sum_ms: self.lifetime_latency_sum_ms.load(Ordering::Relaxed),
        }
    }

    /// Generate a summary report and reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let uploads_count = self.uploads_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.pipeline_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.pipeline_latency_max_ms.swap(0, Ordering::Relaxed);
        let latency_buckets = swap_buckets(&self.pipeline_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let uploads_per_min = if elapsed.as_secs_f64() > 0.0 {
            uploads_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let latency_avg_ms = if uploads_count > 0 { latency_sum / uploads_count } else { 0 };

        MetricsSummary {
            uploads_total: self.uploads_total.load(Ordering::Relaxed),
            uploads_per_min,
            granted_total: self.granted_total.load(Ordering::Relaxed),
            denied_total: self.denied_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            registry_errors_total: self.registry_errors_total.load(Ordering::Relaxed),
            gate_triggers_total: self.gate_triggers_total.load(Ordering::Relaxed),
            gate_auto_closes_total: self.gate_auto_closes_total.load(Ordering::Relaxed),
            gate_open: self.gate_open.load(Ordering::Relaxed),
            detector_failures_total: self.detector_failures_total.load(Ordering::Relaxed),
            ocr_requests_total: self.ocr_requests_total.load(Ordering::Relaxed),
            ocr_failures_total: self.ocr_failures_total.load(Ordering::Relaxed),
            latency_buckets,
            latency_avg_ms,
            latency_max_ms: latency_max,
            latency_p50_ms: percentile_from_buckets(&latency_buckets, 0.50),
            latency_p95_ms: percentile_from_buckets(&latency_buckets, 0.95),
            latency_p99_ms: percentile_from_buckets(&latency_buckets, 0.99),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uploads_total: u64,
    pub uploads_per_min: f64,
    pub granted_total: u64,
    pub denied_total: u64,
    pub failed_total: u64,
    pub registry_errors_total: u64,
    pub gate_triggers_total: u64,
    pub gate_auto_closes_total: u64,
    /// 0=closed, 1=open
    pub gate_open: u64,
    pub detector_failures_total: u64,
    pub ocr_requests_total: u64,
    pub ocr_failures_total: u64,
    /// Pipeline latency histogram since last report
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_avg_ms: u64,
    pub latency_max_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
}

/// Values exposed on the scrape endpoint. Everything here is monotonic
/// except `gate_open`.
#[derive(Debug, Clone)]
pub struct ScrapeSnapshot {
    pub uploads_total: u64,
    pub granted_total: u64,
    pub denied_total: u64,
    pub failed_total: u64,
    pub registry_errors_total: u64,
    pub gate_triggers_total: u64,
    pub gate_auto_closes_total: u64,
    pub gate_open: u64,
    pub detector_failures_total: u64,
    pub ocr_requests_total: u64,
    pub ocr_failures_total: u64,
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_sum_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uploads_total = %self.uploads_total,
            uploads_per_min = format!("{:.1}", self.uploads_per_min),
            granted = %self.granted_total,
            denied = %self.denied_total,
            failed = %self.failed_total,
            registry_errors = %self.registry_errors_total,
            gate_triggers = %self.gate_triggers_total,
            ocr_failures = %self.ocr_failures_total,
            avg_latency_ms = %self.latency_avg_ms,
            p95_ms = %self.latency_p95_ms,
            "metrics"
        );
    }
}
