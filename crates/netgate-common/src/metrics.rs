//! Lock-free latency histogram
//!
//! Tracks how long index generations take to compile. Buckets are decades
//! of microseconds, which covers builds from a handful of rules up to
//! hundreds of thousands.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Inclusive upper edge (µs) of each bucket; the last one is open-ended.
const DECADES_US: [u64; 8] = [10, 100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000, u64::MAX];

/// Decade-bucketed latency histogram
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; DECADES_US.len()],
    count: AtomicU64,
    sum_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl LatencyHistogram {
    /// Create empty histogram
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }

    #[inline]
    fn decade(latency_us: u64) -> usize {
        DECADES_US.partition_point(|&edge| edge < latency_us)
    }

    /// Record one sample
    #[inline]
    pub fn record(&self, latency_us: u64) {
        self.buckets[Self::decade(latency_us)].fetch_add(1, Relaxed);
        self.count.fetch_add(1, Relaxed);
        self.sum_us.fetch_add(latency_us, Relaxed);
        self.min_us.fetch_min(latency_us, Relaxed);
        self.max_us.fetch_max(latency_us, Relaxed);
    }

    /// Samples recorded
    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    /// Mean in microseconds, 0 when empty
    pub fn average(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum_us.load(Relaxed) as f64 / n as f64,
        }
    }

    /// Upper edge of the bucket holding quantile `q` (0.0-1.0), 0 when empty
    pub fn percentile(&self, q: f64) -> u64 {
        let total = self.count();
        if total == 0 {
            return 0;
        }
        let rank = ((total as f64) * q).ceil().max(1.0) as u64;

        let mut seen = 0;
        self.buckets
            .iter()
            .zip(DECADES_US)
            .find_map(|(bucket, edge)| {
                seen += bucket.load(Relaxed);
                (seen >= rank).then_some(edge)
            })
            .unwrap_or(u64::MAX)
    }

    /// Point-in-time copy for stats reporting
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count();
        HistogramSnapshot {
            count,
            sum_us: self.sum_us.load(Relaxed),
            min_us: if count == 0 { 0 } else { self.min_us.load(Relaxed) },
            max_us: self.max_us.load(Relaxed),
            p50: self.percentile(0.50),
            p99: self.percentile(0.99),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable histogram summary
#[derive(Debug, Clone, Default, Serialize)]
#[allow(missing_docs)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub p50: u64,
    pub p99: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decades() {
        assert_eq!(LatencyHistogram::decade(0), 0);
        assert_eq!(LatencyHistogram::decade(10), 0);
        assert_eq!(LatencyHistogram::decade(11), 1);
        assert_eq!(LatencyHistogram::decade(u64::MAX), 7);
    }

    #[test]
    fn test_histogram() {
        let h = LatencyHistogram::new();
        for sample in [1, 50, 500, 5_000, 50_000] {
            h.record(sample);
        }

        assert_eq!(h.count(), 5);
        assert!(h.average() > 0.0);

        let snap = h.snapshot();
        assert_eq!(snap.min_us, 1);
        assert_eq!(snap.max_us, 50_000);
        assert_eq!(snap.p50, 1_000);
        assert_eq!(snap.p99, 100_000);
    }

    #[test]
    fn test_empty_histogram() {
        let snap = LatencyHistogram::new().snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.min_us, 0);
        assert_eq!(snap.p99, 0);
    }
}
