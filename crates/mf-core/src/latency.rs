//! Fixed-bin latency histogram.
//!
//! The gateway records how long each fan-out pass takes (first send to last
//! send, across every subscriber) and periodically logs a summary. A pass is
//! normally a few microseconds per subscriber but one stalled peer can hold
//! it for the whole send timeout, so the range is wide: 50µs bins up to 1s,
//! with slower samples clamped into the last bin.

use std::{fmt, time::Duration};

const BIN_WIDTH_US: u64 = 50;
const NUM_BINS: usize = 20_000;

/// Summary of the recorded samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={}µs max={}µs avg={:.1}µs p50={}µs p90={}µs p99={}µs",
            self.count, self.min_us, self.max_us, self.avg_us, self.p50_us, self.p90_us, self.p99_us,
        )
    }
}

/// Single-owner histogram; the emission task keeps one and resets it after
/// every report.
pub struct LatencyCollector {
    bins: Vec<u64>,
    count: u64,
    sum: u64,
    min: u64,
    max: u64,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self { bins: vec![0u64; NUM_BINS], count: 0, sum: 0, min: u64::MAX, max: 0 }
    }

    #[inline]
    pub fn record_us(&mut self, latency_us: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(latency_us);
        self.min = self.min.min(latency_us);
        self.max = self.max.max(latency_us);

        let bin = ((latency_us / BIN_WIDTH_US) as usize).min(NUM_BINS - 1);
        self.bins[bin] += 1;
    }

    #[inline]
    pub fn record(&mut self, elapsed: Duration) {
        self.record_us(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until something is recorded.
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.count == 0 {
            return None;
        }
        Some(LatencyStats {
            count: self.count,
            min_us: self.min,
            max_us: self.max,
            avg_us: self.sum as f64 / self.count as f64,
            p50_us: self.percentile(0.50),
            p90_us: self.percentile(0.90),
            p99_us: self.percentile(0.99),
        })
    }

    pub fn reset(&mut self) {
        self.bins.fill(0);
        self.count = 0;
        self.sum = 0;
        self.min = u64::MAX;
        self.max = 0;
    }

    /// Lower edge of the bin holding the `pct` quantile, capped at `max`.
    fn percentile(&self, pct: f64) -> u64 {
        let target = ((self.count as f64 * pct).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &n) in self.bins.iter().enumerate() {
            cumulative += n;
            if cumulative >= target {
                return ((i as u64) * BIN_WIDTH_US).min(self.max);
            }
        }
        self.max
    }
}

impl Default for LatencyCollector {
    fn default() -> Self {
        Self::new()
    }
}
