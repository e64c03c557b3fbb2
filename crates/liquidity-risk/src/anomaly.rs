//! Rolling-window anomaly detection
//!
//! Tracks depth, spread and imbalance in three independent rolling windows
//! and flags samples that deviate from the recent regime: a depth collapse,
//! a spread blowout, or a one-sided book. Z-scores are computed against the
//! window's own mean and population standard deviation, so the detector
//! adapts to whatever "normal" currently looks like for the instrument.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

pub const DEFAULT_WINDOW_CAPACITY: usize = 300;
pub const DEFAULT_MIN_SAMPLES: usize = 30;
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 3.0;

/// How far outside the regime the worst triggering metric sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    High,
    Critical,
}

/// Verdict for one sample
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub is_anomaly: bool,
    pub severity: Severity,
    pub depth_zscore: f64,
    pub spread_zscore: f64,
    pub imbalance_zscore: f64,
    /// Human-readable triggers, empty when normal
    pub reason: String,
    /// Samples in the window when the verdict was made
    pub samples: usize,
}

impl AnomalyReport {
    fn insufficient(samples: usize) -> Self {
        Self {
            is_anomaly: false,
            severity: Severity::Normal,
            depth_zscore: 0.0,
            spread_zscore: 0.0,
            imbalance_zscore: 0.0,
            reason: "insufficient data".to_string(),
            samples,
        }
    }
}

/// Mean and standard deviation of one metric window
#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// Rolling statistics for all three windows
#[derive(Debug, Clone, Serialize)]
pub struct DetectorStats {
    pub depth: WindowStats,
    pub spread: WindowStats,
    pub imbalance: WindowStats,
}

struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Population standard deviation over the window
    fn std_dev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self
            .samples
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }

    /// Z-score of a value against this window; 0 in a flat window
    fn zscore(&self, value: f64) -> f64 {
        let std_dev = self.std_dev();
        if std_dev == 0.0 {
            return 0.0;
        }
        (value - self.mean()) / std_dev
    }

    fn stats(&self) -> WindowStats {
        let (min, max) = if self.samples.is_empty() {
            (0.0, 0.0)
        } else {
            self.samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            })
        };
        WindowStats {
            samples: self.len(),
            mean: self.mean(),
            std_dev: self.std_dev(),
            min,
            max,
        }
    }
}

/// Rolling-window Z-score detector over depth, spread and imbalance
pub struct AnomalyDetector {
    depth: Window,
    spread: Window,
    imbalance: Window,
    min_samples: usize,
    threshold: f64,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::with_parameters(
            DEFAULT_WINDOW_CAPACITY,
            DEFAULT_MIN_SAMPLES,
            DEFAULT_ZSCORE_THRESHOLD,
        )
    }

    pub fn with_parameters(capacity: usize, min_samples: usize, threshold: f64) -> Self {
        Self {
            depth: Window::new(capacity),
            spread: Window::new(capacity),
            imbalance: Window::new(capacity),
            min_samples,
            threshold,
        }
    }

    /// Record one sample of each metric and judge it against the windows
    ///
    /// The sample is scored against the window *including itself*, matching
    /// a detector that appends before evaluating. Flag directions are
    /// one-sided where the risk is one-sided: only *low* depth and only
    /// *wide* spreads are anomalous; imbalance is symmetric.
    pub fn record(&mut self, depth: f64, spread_bps: f64, imbalance: f64) -> AnomalyReport {
        self.depth.push(depth);
        self.spread.push(spread_bps);
        self.imbalance.push(imbalance);

        let samples = self.depth.len();
        if samples < self.min_samples {
            return AnomalyReport::insufficient(samples);
        }

        let depth_zscore = self.depth.zscore(depth);
        let spread_zscore = self.spread.zscore(spread_bps);
        let imbalance_zscore = self.imbalance.zscore(imbalance);

        let mut reasons = Vec::new();
        let mut worst: f64 = 0.0;
        if depth_zscore < -self.threshold {
            reasons.push(format!("depth collapse (z={depth_zscore:.2})"));
            worst = worst.max(depth_zscore.abs());
        }
        if spread_zscore > self.threshold {
            reasons.push(format!("spread blowout (z={spread_zscore:.2})"));
            worst = worst.max(spread_zscore.abs());
        }
        if imbalance_zscore.abs() > self.threshold {
            reasons.push(format!("extreme imbalance (z={imbalance_zscore:.2})"));
            worst = worst.max(imbalance_zscore.abs());
        }

        let is_anomaly = !reasons.is_empty();
        let severity = if !is_anomaly {
            Severity::Normal
        } else if worst >= 5.0 {
            Severity::Critical
        } else if worst >= 4.0 {
            Severity::High
        } else {
            Severity::Warning
        };

        let reason = reasons.join("; ");
        if is_anomaly {
            warn!(
                severity = ?severity,
                depth_zscore,
                spread_zscore,
                imbalance_zscore,
                %reason,
                "liquidity anomaly"
            );
        }

        AnomalyReport {
            is_anomaly,
            severity,
            depth_zscore,
            spread_zscore,
            imbalance_zscore,
            reason,
            samples,
        }
    }

    pub fn statistics(&self) -> DetectorStats {
        DetectorStats {
            depth: self.depth.stats(),
            spread: self.spread.stats(),
            imbalance: self.imbalance.stats(),
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}
