//! Multi-venue coordination
//!
//! Runs several feeds concurrently and answers cross-venue questions:
//! aggregate status, spread comparison, and a naive top-of-book arbitrage
//! check. Analytics are gated on every feed being synchronized; a half-built
//! book produces numbers that look plausible and are wrong.

use crate::error::{FeedError, FeedResult};
use crate::sync::{FeedStatus, FeedSynchronizer};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{info, warn};

/// Drives a set of feeds for one symbol across venues
pub struct MultiExchangeCoordinator {
    symbol: String,
    feeds: BTreeMap<String, Arc<dyn FeedSynchronizer>>,
    tasks: Mutex<Vec<AbortHandle>>,
    running: AtomicBool,
}

/// Aggregate status across all coordinated feeds
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub symbol: String,
    pub running: bool,
    pub all_synchronized: bool,
    pub feeds: BTreeMap<String, FeedStatus>,
}

/// Per-venue spread snapshot, all feeds synchronized
#[derive(Debug, Clone, Serialize)]
pub struct SpreadComparison {
    pub symbol: String,
    /// Spread in basis points per exchange
    pub spreads: BTreeMap<String, f64>,
    pub tightest_exchange: String,
    pub widest_exchange: String,
    pub spread_difference_bps: f64,
}

/// Top-of-book arbitrage check across venues
///
/// `arbitrage_exists` is true when some venue's best bid exceeds another
/// venue's best ask. Fees and transfer latency are out of scope; this flags
/// dislocations, it does not price a trade.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageCheck {
    pub symbol: String,
    pub arbitrage_exists: bool,
    pub buy_from: Option<String>,
    pub buy_price: Option<f64>,
    pub sell_to: Option<String>,
    pub sell_price: Option<f64>,
    pub spread: Option<f64>,
    pub spread_bps: Option<f64>,
}

impl MultiExchangeCoordinator {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            feeds: BTreeMap::new(),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Register a feed, keyed by its exchange name
    pub fn add_feed(&mut self, feed: Arc<dyn FeedSynchronizer>) {
        self.feeds.insert(feed.exchange().to_string(), feed);
    }

    pub fn feed(&self, exchange: &str) -> Option<&Arc<dyn FeedSynchronizer>> {
        self.feeds.get(exchange)
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }

    /// Run every feed to completion
    ///
    /// Returns the first feed error once all tasks have settled. Stopping the
    /// coordinator makes the feeds return cleanly.
    pub async fn run(&self) -> FeedResult<()> {
        if self.feeds.is_empty() {
            return Err(FeedError::Desynchronized {
                reason: "no feeds registered".into(),
            });
        }
        self.running.store(true, Ordering::Relaxed);
        info!(
            symbol = %self.symbol,
            feeds = self.feeds.len(),
            "starting coordinated feeds"
        );

        let mut handles = Vec::with_capacity(self.feeds.len());
        for (exchange, feed) in &self.feeds {
            let exchange = exchange.clone();
            let feed = feed.clone();
            let handle = tokio::spawn(async move {
                let result = feed.run().await;
                if let Err(err) = &result {
                    warn!(exchange = %exchange, error = %err, "feed terminated");
                }
                result
            });
            self.tasks.lock().push(handle.abort_handle());
            handles.push(handle);
        }

        let results = join_all(handles).await;
        self.running.store(false, Ordering::Relaxed);
        self.tasks.lock().clear();

        for result in results {
            match result {
                Ok(Err(err)) => return Err(err),
                Ok(Ok(())) => {}
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    return Err(FeedError::Desynchronized {
                        reason: format!("feed task panicked: {join_err}"),
                    })
                }
            }
        }
        Ok(())
    }

    /// Signal all feeds to stop, then abort anything still in flight
    pub fn stop(&self) {
        info!(symbol = %self.symbol, "stopping coordinated feeds");
        for feed in self.feeds.values() {
            feed.stop();
        }
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn all_synchronized(&self) -> bool {
        !self.feeds.is_empty() && self.feeds.values().all(|feed| feed.is_synchronized())
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            symbol: self.symbol.clone(),
            running: self.is_running(),
            all_synchronized: self.all_synchronized(),
            feeds: self
                .feeds
                .iter()
                .map(|(exchange, feed)| (exchange.clone(), feed.status()))
                .collect(),
        }
    }

    /// Compare spreads across venues
    ///
    /// None unless every feed is synchronized, at least two venues have a
    /// two-sided book, and the spreads are comparable.
    pub fn spread_comparison(&self) -> Option<SpreadComparison> {
        if !self.all_synchronized() {
            return None;
        }

        let mut spreads = BTreeMap::new();
        for (exchange, feed) in &self.feeds {
            let book = feed.book();
            let book = book.read();
            if let Some(spread_bps) = book.spread_bps().and_then(|bps| bps.to_f64()) {
                spreads.insert(exchange.clone(), spread_bps);
            }
        }
        if spreads.len() < 2 {
            return None;
        }

        let (tightest, tight_bps) = spreads
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let (widest, wide_bps) = spreads
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))?;

        Some(SpreadComparison {
            symbol: self.symbol.clone(),
            tightest_exchange: tightest.clone(),
            widest_exchange: widest.clone(),
            spread_difference_bps: wide_bps - tight_bps,
            spreads,
        })
    }

    /// Check for a top-of-book dislocation between any two venues
    pub fn arbitrage(&self) -> Option<ArbitrageCheck> {
        if !self.all_synchronized() || self.feeds.len() < 2 {
            return None;
        }

        let mut best_bid: Option<(String, Decimal)> = None;
        let mut best_ask: Option<(String, Decimal)> = None;
        for (exchange, feed) in &self.feeds {
            let book = feed.book();
            let book = book.read();
            if let Some((price, _)) = book.best_bid() {
                if best_bid.as_ref().map_or(true, |(_, best)| price > *best) {
                    best_bid = Some((exchange.clone(), price));
                }
            }
            if let Some((price, _)) = book.best_ask() {
                if best_ask.as_ref().map_or(true, |(_, best)| price < *best) {
                    best_ask = Some((exchange.clone(), price));
                }
            }
        }

        let (bid_exchange, bid) = best_bid?;
        let (ask_exchange, ask) = best_ask?;

        if bid > ask && bid_exchange != ask_exchange {
            let spread = bid - ask;
            let spread_bps = spread / ask * Decimal::from(10_000);
            Some(ArbitrageCheck {
                symbol: self.symbol.clone(),
                arbitrage_exists: true,
                buy_from: Some(ask_exchange),
                buy_price: ask.to_f64(),
                sell_to: Some(bid_exchange),
                sell_price: bid.to_f64(),
                spread: spread.to_f64(),
                spread_bps: spread_bps.to_f64(),
            })
        } else {
            Some(ArbitrageCheck {
                symbol: self.symbol.clone(),
                arbitrage_exists: false,
                buy_from: None,
                buy_price: None,
                sell_to: None,
                sell_price: None,
                spread: None,
                spread_bps: None,
            })
        }
    }
}
