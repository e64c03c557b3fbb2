//! Per-cycle risk evaluation
//!
//! One [`RiskEngine`] per instrument. Each evaluation cycle takes a
//! point-in-time depth view, computes the full metric set and feeds the
//! anomaly detector, producing a serializable [`RiskReport`].

use crate::anomaly::{AnomalyDetector, AnomalyReport, DetectorStats};
use crate::metrics::{
    depth_at_bps, depth_imbalance, estimate_slippage, DepthAtBps, RiskError, SlippageEstimate,
    TakerSide,
};
use liquidity_book::DepthView;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RiskEngineConfig {
    pub symbol: String,
    /// Simulated sell sizes in quote currency
    pub slippage_sizes: Vec<f64>,
    /// Bands for depth-at-distance, in basis points of mid
    pub depth_bands_bps: Vec<u32>,
    /// Levels per side for the imbalance metric
    pub imbalance_levels: usize,
}

impl RiskEngineConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            slippage_sizes: vec![100_000.0, 500_000.0, 1_000_000.0],
            depth_bands_bps: vec![10, 50, 100],
            imbalance_levels: 10,
        }
    }

    pub fn with_slippage_sizes(mut self, sizes: Vec<f64>) -> Self {
        self.slippage_sizes = sizes;
        self
    }

    pub fn with_depth_bands(mut self, bands: Vec<u32>) -> Self {
        self.depth_bands_bps = bands;
        self
    }
}

/// Top-of-book facts for the cycle
#[derive(Debug, Clone, Serialize)]
pub struct BasicMetrics {
    pub mid_price: f64,
    pub spread_bps: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_levels: usize,
    pub ask_levels: usize,
}

/// Full metric set for one evaluation cycle
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub symbol: String,
    pub basic: BasicMetrics,
    /// Keyed by size label, e.g. "sell_100k"
    pub slippage: BTreeMap<String, SlippageEstimate>,
    /// Keyed by band, e.g. "10bps"
    pub depth: BTreeMap<String, DepthAtBps>,
    pub imbalance: f64,
    pub anomaly: AnomalyReport,
}

/// Stateful risk evaluator: stateless metrics plus the rolling detector
pub struct RiskEngine {
    config: RiskEngineConfig,
    detector: AnomalyDetector,
}

fn size_label(size: f64) -> String {
    if size >= 1_000_000.0 {
        format!("{}m", (size / 1_000_000.0) as u64)
    } else if size >= 1_000.0 {
        format!("{}k", (size / 1_000.0) as u64)
    } else {
        format!("{}", size as u64)
    }
}

impl RiskEngine {
    pub fn new(config: RiskEngineConfig) -> Self {
        Self {
            config,
            detector: AnomalyDetector::new(),
        }
    }

    pub fn with_detector(config: RiskEngineConfig, detector: AnomalyDetector) -> Self {
        Self { config, detector }
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn detector_statistics(&self) -> DetectorStats {
        self.detector.statistics()
    }

    /// Evaluate one cycle against a point-in-time depth view
    ///
    /// Slippage sizes the book cannot price (one-sided or empty view) are
    /// skipped rather than failing the whole cycle; only a view with no
    /// two-sided top of book is an error.
    pub fn evaluate(&mut self, view: &DepthView) -> Result<RiskReport, RiskError> {
        let mid_price = view.mid_price().ok_or(RiskError::EmptyBook)?;
        let spread_bps = view.spread_bps().ok_or(RiskError::EmptyBook)?;
        let basic = BasicMetrics {
            mid_price,
            spread_bps,
            best_bid: view.bids[0].price_f64(),
            best_ask: view.asks[0].price_f64(),
            bid_levels: view.bids.len(),
            ask_levels: view.asks.len(),
        };

        let mut slippage = BTreeMap::new();
        for &size in &self.config.slippage_sizes {
            match estimate_slippage(&view.bids, &view.asks, size, TakerSide::Sell) {
                Ok(estimate) => {
                    slippage.insert(format!("sell_{}", size_label(size)), estimate);
                }
                Err(err) => {
                    debug!(symbol = %self.config.symbol, size, error = %err, "slippage size skipped");
                }
            }
        }

        let mut depth = BTreeMap::new();
        for &bps in &self.config.depth_bands_bps {
            let band = depth_at_bps(&view.bids, &view.asks, bps)?;
            depth.insert(format!("{bps}bps"), band);
        }

        let imbalance = depth_imbalance(&view.bids, &view.asks, self.config.imbalance_levels);

        // The detector watches quote depth in the innermost band
        let inner_depth = self
            .config
            .depth_bands_bps
            .first()
            .map(|bps| depth[&format!("{bps}bps")].total_value())
            .unwrap_or(0.0);
        let anomaly = self.detector.record(inner_depth, spread_bps, imbalance);

        Ok(RiskReport {
            symbol: self.config.symbol.clone(),
            basic,
            slippage,
            depth,
            imbalance,
            anomaly,
        })
    }
}
