//! # Client Metrics
//!
//! Lightweight counters and a latency histogram covering request outcomes,
//! retries and topology refreshes.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Fixed Buckets**: Histogram buckets live in a contiguous array.
//! 3. **Plain Snapshots**: Readers get a point-in-time copy as a plain struct.
//!
//! `Ordering::Relaxed` is used throughout; fields are independent and only
//! need eventual consistency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default latency bucket boundaries in microseconds.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] = [
    50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000, 1_000_000,
];

/// Snapshot of all client metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Commands issued through the routing engine.
    pub requests_total: u64,
    /// Commands that ended with a negative status.
    pub errors_total: u64,
    /// Retries after a MOVED redirect.
    pub moved_retries: u64,
    /// Retries after a transport failure.
    pub transport_retries: u64,
    /// Refreshes requested by callers.
    pub forced_refreshes: u64,
    /// Topology refreshes that published a new snapshot.
    pub refresh_ok: u64,
    /// Topology refreshes that failed.
    pub refresh_failed: u64,
    /// Latency histogram snapshot.
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    /// Total number of samples.
    pub samples: u64,
    /// Sum of latencies in microseconds.
    pub sum_us: u64,
}

impl LatencySnapshot {
    /// Mean latency, or zero without samples.
    pub fn mean(&self) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.sum_us / self.samples)
    }
}

/// Thread-safe metrics aggregator for one client.
pub struct Metrics {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    moved_retries: AtomicU64,
    transport_retries: AtomicU64,
    forced_refreshes: AtomicU64,
    refresh_ok: AtomicU64,
    refresh_failed: AtomicU64,
    latency: LatencyHistogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new aggregator with the default latency buckets.
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates a new aggregator with custom latency bucket boundaries.
    ///
    /// The boundaries must be sorted ascending and represent microseconds.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        Metrics {
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            moved_retries: AtomicU64::new(0),
            transport_retries: AtomicU64::new(0),
            forced_refreshes: AtomicU64::new(0),
            refresh_ok: AtomicU64::new(0),
            refresh_failed: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    /// Records one finished request and its latency.
    pub fn record_request(&self, latency: Duration, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.latency.record(latency);
    }

    pub fn record_moved_retry(&self) {
        self.moved_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transport_retry(&self) {
        self.transport_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_refresh(&self) {
        self.forced_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, ok: bool) {
        let counter = if ok {
            &self.refresh_ok
        } else {
            &self.refresh_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters and histogram buckets.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            moved_retries: self.moved_retries.load(Ordering::Relaxed),
            transport_retries: self.transport_retries.load(Ordering::Relaxed),
            forced_refreshes: self.forced_refreshes.load(Ordering::Relaxed),
            refresh_ok: self.refresh_ok.load(Ordering::Relaxed),
            refresh_failed: self.refresh_failed.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Bucket selection is a linear scan; the list is short and stays hot in
/// cache.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_us.len() + 1` buckets; the last one
    /// collects everything above the highest bound.
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);
        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_by_upper_bound() {
        let histogram = LatencyHistogram::new(vec![10, 100]);
        histogram.record(Duration::from_micros(5));
        histogram.record(Duration::from_micros(10));
        histogram.record(Duration::from_micros(50));
        histogram.record(Duration::from_millis(5));

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.buckets, vec![2, 1, 1]);
        assert_eq!(snapshot.samples, 4);
        assert_eq!(snapshot.sum_us, 5 + 10 + 50 + 5_000);
        assert_eq!(snapshot.mean(), Duration::from_micros(5_065 / 4));
    }

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_request(Duration::from_micros(70), false);
        metrics.record_request(Duration::from_micros(70), true);
        metrics.record_moved_retry();
        metrics.record_transport_retry();
        metrics.record_forced_refresh();
        metrics.record_refresh(true);
        metrics.record_refresh(false);
        metrics.record_refresh(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.errors_total, 1);
        assert_eq!(snapshot.moved_retries, 1);
        assert_eq!(snapshot.transport_retries, 1);
        assert_eq!(snapshot.forced_refreshes, 1);
        assert_eq!(snapshot.refresh_ok, 1);
        assert_eq!(snapshot.refresh_failed, 2);
        assert_eq!(snapshot.latency.buckets[1], 2);
    }

    #[test]
    fn empty_histogram_mean_is_zero() {
        assert_eq!(Metrics::new().snapshot().latency.mean(), Duration::ZERO);
    }
}
