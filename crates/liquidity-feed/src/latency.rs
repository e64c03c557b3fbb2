//! Feed latency tracking
//!
//! One-way latency (local receive time minus exchange event time) over a
//! sliding sample window, with percentile summaries and a coarse health
//! status the coordinator surfaces per venue.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Latency tracker configuration
#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// Number of samples kept in the sliding window
    pub window_size: usize,
    /// Latencies at or above this are counted as warnings (ms)
    pub warning_threshold_ms: f64,
    /// Latencies at or above this are counted as critical (ms)
    pub critical_threshold_ms: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            warning_threshold_ms: 50.0,
            critical_threshold_ms: 100.0,
        }
    }
}

impl LatencyConfig {
    /// Config with custom thresholds
    pub fn with_thresholds(warning_ms: f64, critical_ms: f64) -> Self {
        Self {
            warning_threshold_ms: warning_ms,
            critical_threshold_ms: critical_ms,
            ..Default::default()
        }
    }
}

/// Coarse latency health classification, driven by the p99
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyStatus {
    /// No samples yet
    NoData,
    /// p99 under 10 ms
    Excellent,
    /// p99 under the warning threshold
    Good,
    /// p99 at or above the warning threshold
    Warning,
    /// p99 at or above the critical threshold
    Critical,
}

/// Serializable latency summary
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub current_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub std_dev_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub total_samples: u64,
    pub warning_count: u64,
    pub critical_count: u64,
    pub warning_rate: f64,
    pub critical_rate: f64,
    pub status: LatencyStatus,
}

/// Sliding window latency tracker
#[derive(Debug)]
pub struct LatencyTracker {
    config: LatencyConfig,
    samples: VecDeque<f64>,
    current_ms: f64,
    min_ms: f64,
    max_ms: f64,
    total_samples: u64,
    warning_count: u64,
    critical_count: u64,
}

impl LatencyTracker {
    pub fn new(config: LatencyConfig) -> Self {
        let capacity = config.window_size;
        Self {
            config,
            samples: VecDeque::with_capacity(capacity),
            current_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            total_samples: 0,
            warning_count: 0,
            critical_count: 0,
        }
    }

    /// Record a sample against the local wall clock
    ///
    /// `exchange_time_ms` is the venue's event timestamp in epoch millis.
    /// Returns the recorded latency.
    pub fn record(&mut self, exchange_time_ms: f64) -> f64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        self.record_at(exchange_time_ms, now_ms)
    }

    /// Record a sample with an explicit local timestamp
    pub fn record_at(&mut self, exchange_time_ms: f64, local_time_ms: f64) -> f64 {
        let mut latency = local_time_ms - exchange_time_ms;
        if latency < 0.0 {
            // Clock skew between us and the venue
            warn!(latency_ms = latency, "negative latency sample, clamping to zero");
            latency = 0.0;
        }

        if self.samples.len() >= self.config.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);

        self.current_ms = latency;
        self.min_ms = self.min_ms.min(latency);
        self.max_ms = self.max_ms.max(latency);
        self.total_samples += 1;

        if latency >= self.config.critical_threshold_ms {
            self.critical_count += 1;
        } else if latency >= self.config.warning_threshold_ms {
            self.warning_count += 1;
        }

        latency
    }

    /// Number of samples currently in the window
    pub fn window_len(&self) -> usize {
        self.samples.len()
    }

    /// Percentile over the current window (linear interpolation)
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            sorted[lo]
        } else {
            let frac = rank - lo as f64;
            sorted[lo] * (1.0 - frac) + sorted[hi] * frac
        }
    }

    /// Summarize the window
    pub fn summary(&self) -> LatencySummary {
        let n = self.samples.len();
        let mean = if n == 0 {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / n as f64
        };
        let std_dev = if n == 0 {
            0.0
        } else {
            let var = self
                .samples
                .iter()
                .map(|x| (x - mean) * (x - mean))
                .sum::<f64>()
                / n as f64;
            var.sqrt()
        };

        let p99 = self.percentile(99.0);
        let status = if n == 0 {
            LatencyStatus::NoData
        } else if p99 >= self.config.critical_threshold_ms {
            LatencyStatus::Critical
        } else if p99 >= self.config.warning_threshold_ms {
            LatencyStatus::Warning
        } else if p99 < 10.0 {
            LatencyStatus::Excellent
        } else {
            LatencyStatus::Good
        };

        LatencySummary {
            current_ms: self.current_ms,
            mean_ms: mean,
            min_ms: if self.min_ms.is_finite() { self.min_ms } else { 0.0 },
            max_ms: self.max_ms,
            std_dev_ms: std_dev,
            p50_ms: self.percentile(50.0),
            p95_ms: self.percentile(95.0),
            p99_ms: p99,
            total_samples: self.total_samples,
            warning_count: self.warning_count,
            critical_count: self.critical_count,
            warning_rate: rate(self.warning_count, self.total_samples),
            critical_rate: rate(self.critical_count, self.total_samples),
            status,
        }
    }
}

fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}
