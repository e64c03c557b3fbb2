//! BTreeMap-based orderbook storage
//!
//! Provides O(log N) operations for price level management.
//! Uses `Reverse<Decimal>` for bids to maintain descending order.

use liquidity_types::Level;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Both sides of an L2 book
///
/// - Bids: stored with `Reverse<Decimal>` key for descending order (highest first)
/// - Asks: stored with `Decimal` key for ascending order (lowest first)
#[derive(Debug, Clone, Default)]
pub struct BookSides {
    /// Bids: highest price first (Reverse for descending order)
    bids: BTreeMap<Reverse<Decimal>, Level>,
    /// Asks: lowest price first (natural ascending order)
    asks: BTreeMap<Decimal, Level>,
}

impl BookSides {
    /// Create empty storage
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    /// Insert or update a bid level.
    /// Zero or negative qty removes the level.
    pub fn set_bid(&mut self, price: Decimal, qty: Decimal) {
        if qty <= Decimal::ZERO {
            self.bids.remove(&Reverse(price));
        } else {
            self.bids.insert(Reverse(price), Level::new(price, qty));
        }
    }

    /// Insert or update an ask level.
    /// Zero or negative qty removes the level.
    pub fn set_ask(&mut self, price: Decimal, qty: Decimal) {
        if qty <= Decimal::ZERO {
            self.asks.remove(&price);
        } else {
            self.asks.insert(price, Level::new(price, qty));
        }
    }

    /// Get the best bid (highest price)
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.values().next()
    }

    /// Get the best ask (lowest price)
    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.values().next()
    }

    /// Iterator over bids (highest to lowest price)
    pub fn bids(&self) -> impl Iterator<Item = &Level> {
        self.bids.values()
    }

    /// Iterator over asks (lowest to highest price)
    pub fn asks(&self) -> impl Iterator<Item = &Level> {
        self.asks.values()
    }

    /// Get top N bids
    pub fn top_bids(&self, n: usize) -> Vec<Level> {
        self.bids.values().take(n).cloned().collect()
    }

    /// Get top N asks
    pub fn top_asks(&self, n: usize) -> Vec<Level> {
        self.asks.values().take(n).cloned().collect()
    }

    /// Number of bid levels
    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask levels
    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }

    /// Check if both sides are empty
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Clear all levels
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }
}
