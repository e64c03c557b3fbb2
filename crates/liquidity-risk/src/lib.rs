//! Liquidity risk analytics
//!
//! Consumes point-in-time depth views from a reconstructed order book and
//! produces execution-risk metrics: slippage for simulated market orders,
//! depth within price bands, order book imbalance, and rolling-window
//! anomaly detection over all three.
//!
//! ```
//! use liquidity_book::DepthView;
//! use liquidity_risk::{RiskEngine, RiskEngineConfig};
//! use liquidity_types::Level;
//!
//! let mut engine = RiskEngine::new(RiskEngineConfig::new("BTCUSDT"));
//! let view = DepthView {
//!     bids: vec![Level::from_f64(50000.0, 5.0)],
//!     asks: vec![Level::from_f64(50010.0, 5.0)],
//! };
//! let report = engine.evaluate(&view).unwrap();
//! assert!(report.basic.mid_price > 50000.0);
//! ```

pub mod anomaly;
pub mod engine;
pub mod metrics;

pub use anomaly::{AnomalyDetector, AnomalyReport, DetectorStats, Severity, WindowStats};
pub use engine::{BasicMetrics, RiskEngine, RiskEngineConfig, RiskReport};
pub use metrics::{
    depth_at_bps, depth_imbalance, estimate_slippage, DepthAtBps, RiskError, SlippageEstimate,
    TakerSide,
};
