use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median of the window, in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile of the window, in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile of the window, in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let measurements = self.measurements.lock();
        if measurements.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<_> = measurements.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage counters shared by all replicas of a stage
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Values the stage operation was applied to
    items_processed: Arc<AtomicU64>,
    /// Values rejected by a filter predicate
    items_filtered: Arc<AtomicU64>,
    /// Holes received from upstream and passed on
    holes_forwarded: Arc<AtomicU64>,
    /// Largest number of items parked in the stage's reorder buffer
    reorder_high_water: Arc<AtomicU64>,
    /// Pushes that found the stage's output queue full (backpressure)
    blocks: Arc<AtomicU64>,
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    /// Create a new set of metrics, starting the throughput clock
    pub fn new() -> Self {
        Self {
            items_processed: Arc::new(AtomicU64::new(0)),
            items_filtered: Arc::new(AtomicU64::new(0)),
            holes_forwarded: Arc::new(AtomicU64::new(0)),
            reorder_high_water: Arc::new(AtomicU64::new(0)),
            blocks: Arc::new(AtomicU64::new(0)),
            latency_tracker: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Record a value the stage operation was applied to
    pub fn record_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a value rejected by the stage's predicate
    pub fn record_filtered(&self) {
        self.items_filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hole passed through from upstream
    pub fn record_hole(&self) {
        self.holes_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the current reorder buffer depth, keeping the maximum
    pub fn record_reorder_depth(&self, depth: usize) {
        self.reorder_high_water
            .fetch_max(depth as u64, Ordering::Relaxed);
    }

    /// Record block events (backpressure triggered)
    pub fn record_blocks(&self, count: u64) {
        self.blocks.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a latency measurement in nanoseconds
    pub fn record_latency(&self, nanos: u64) {
        self.latency_tracker.record(nanos);
    }

    /// Get the total number of values processed
    pub fn total_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    /// Get the total number of values filtered out
    pub fn total_filtered(&self) -> u64 {
        self.items_filtered.load(Ordering::Relaxed)
    }

    /// Get the total number of holes forwarded
    pub fn total_holes(&self) -> u64 {
        self.holes_forwarded.load(Ordering::Relaxed)
    }

    /// Get the largest reorder buffer depth seen
    pub fn reorder_high_water(&self) -> u64 {
        self.reorder_high_water.load(Ordering::Relaxed)
    }

    /// Get the total number of block events
    pub fn total_blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Calculate current throughput in items per second
    pub fn throughput_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed();
        let total = self.total_processed();
        if elapsed.as_secs_f64() == 0.0 {
            0.0
        } else {
            total as f64 / elapsed.as_secs_f64()
        }
    }

    /// Take a snapshot of the current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: self.total_processed(),
            total_filtered: self.total_filtered(),
            total_holes: self.total_holes(),
            reorder_high_water: self.reorder_high_water(),
            total_blocks: self.total_blocks(),
            throughput_ips: self.throughput_ips(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p95_us: self.latency_tracker.p95_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_filtered: u64,
    pub total_holes: u64,
    pub reorder_high_water: u64,
    pub total_blocks: u64,
    pub throughput_ips: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Processed: {}, Filtered: {}, Holes: {}, Reorder depth: {}, Blocks: {}, \
             Throughput: {:.2} items/s, Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, \
             Elapsed: {:.2}s",
            self.total_processed,
            self.total_filtered,
            self.total_holes,
            self.reorder_high_water,
            self.total_blocks,
            self.throughput_ips,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
