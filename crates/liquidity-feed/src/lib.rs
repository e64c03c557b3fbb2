//! Live order book feeds
//!
//! Maintains synchronized Level-2 order books from venue WebSocket streams.
//! Two synchronization disciplines are implemented:
//!
//! - [`BinanceFeed`]: buffer deltas, fetch a REST snapshot, bridge the
//!   buffered stream onto the snapshot watermark, then apply live.
//! - [`BybitFeed`]: the venue pushes a snapshot on subscription; deltas are
//!   continuity-checked and a crossed book forces a full resubscribe.
//!
//! [`MultiExchangeCoordinator`] runs several feeds for one symbol and answers
//! cross-venue questions (spread comparison, top-of-book arbitrage).
//!
//! ```no_run
//! use liquidity_feed::{BinanceConfig, BinanceFeed, FeedSynchronizer};
//!
//! # async fn run() -> liquidity_feed::FeedResult<()> {
//! let feed = BinanceFeed::new(BinanceConfig::new("BTCUSDT"))?;
//! feed.run().await
//! # }
//! ```
//!
//! Enable the `test-utils` feature for scriptable mock transports and
//! snapshot sources.

pub mod binance;
pub mod bybit;
pub mod coordinator;
pub mod error;
pub mod latency;
pub mod reconnect;
pub mod snapshot;
pub mod sync;
pub mod transport;

pub use binance::{BinanceConfig, BinanceFeed};
pub use bybit::{BybitConfig, BybitFeed};
pub use coordinator::{ArbitrageCheck, CoordinatorStatus, MultiExchangeCoordinator, SpreadComparison};
pub use error::{FeedError, FeedResult};
pub use latency::{LatencyConfig, LatencyStatus, LatencySummary, LatencyTracker};
pub use reconnect::ReconnectPolicy;
pub use snapshot::{RestSnapshotSource, SnapshotSource};
pub use sync::{ConnectionState, CounterSnapshot, FeedStatus, FeedSynchronizer, SyncState};
pub use transport::{Connector, Transport, TransportError, WsConnector};

#[cfg(any(test, feature = "test-utils"))]
pub use snapshot::MockSnapshotSource;
#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockConnector, MockTransport, ScriptItem};
