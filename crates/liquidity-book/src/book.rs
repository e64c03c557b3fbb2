//! Sequenced orderbook state machine
//!
//! Reconciles a REST/pushed snapshot with a stream of sequenced deltas.
//!
//! # Sequencing
//!
//! Every delta carries `[first_id, final_id]`. After a snapshot at watermark
//! `W` the book is *awaiting a bridge*: the first applied delta must satisfy
//! `first_id <= W + 1 <= final_id`, proving it overlaps the snapshot. Once
//! bridged, deltas advance the watermark to their `final_id`. Stale deltas
//! (`final_id <= W`) are skipped without mutation; deltas that reach
//! backwards past the watermark are rejected; forward gaps are tolerated
//! (the venue aggregates, gaps are normal under load).

use crate::checksum::{compute_checksum, DEFAULT_CHECKSUM_DEPTH};
use crate::storage::BookSides;
use liquidity_types::{Level, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Result of applying a sequenced delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Delta applied, watermark advanced
    Applied,
    /// Entirely at or below the watermark; skipped, book untouched
    Stale,
    /// Reaches backwards past the watermark; rejected, book untouched
    Backwards,
    /// Awaiting a bridge and this delta does not span the watermark
    BridgeMismatch,
}

impl UpdateOutcome {
    /// True when the delta mutated the book
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied)
    }

    /// True when the outcome means the book can no longer be trusted
    pub fn is_desync(&self) -> bool {
        matches!(self, UpdateOutcome::Backwards | UpdateOutcome::BridgeMismatch)
    }
}

/// Reconstructed L2 book for a single symbol
#[derive(Debug, Clone)]
pub struct OrderBook {
    /// Symbol this book tracks
    symbol: String,
    /// Price level storage
    sides: BookSides,
    /// Sequence id of the last applied snapshot or delta
    last_sequence_id: u64,
    /// Set by a snapshot; cleared by the first delta spanning the watermark
    awaiting_bridge: bool,
}

/// Serializable summary of book state
#[derive(Debug, Clone, Serialize)]
pub struct BookStats {
    pub symbol: String,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub mid_price: Option<Decimal>,
    pub spread_bps: Option<Decimal>,
    pub last_sequence_id: u64,
    pub awaiting_bridge: bool,
}

/// Read-only depth view for analytics
///
/// Bids high→low, asks low→high, both truncated to the requested depth.
/// Analytics run in `f64`; the helpers here do that conversion once.
#[derive(Debug, Clone, Serialize)]
pub struct DepthView {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl DepthView {
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// Mid price as f64, None when either side is empty
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price_f64() + ask.price_f64()) / 2.0),
            _ => None,
        }
    }

    /// Spread in basis points of mid, None when either side is empty
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?.price_f64();
        let ask = self.best_ask()?.price_f64();
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

impl OrderBook {
    /// Create an empty book for a symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sides: BookSides::new(),
            last_sequence_id: 0,
            awaiting_bridge: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.last_sequence_id
    }

    pub fn is_awaiting_bridge(&self) -> bool {
        self.awaiting_bridge
    }

    pub fn bid_count(&self) -> usize {
        self.sides.bid_count()
    }

    pub fn ask_count(&self) -> usize {
        self.sides.ask_count()
    }

    pub fn is_empty(&self) -> bool {
        self.sides.is_empty()
    }

    /// Best bid as (price, qty)
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.sides.best_bid().map(|l| (l.price, l.qty))
    }

    /// Best ask as (price, qty)
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.sides.best_ask().map(|l| (l.price, l.qty))
    }

    /// Mid price ((bid + ask) / 2)
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Spread in basis points of mid
    pub fn spread_bps(&self) -> Option<Decimal> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        let mid = (bid + ask) / Decimal::TWO;
        if mid <= Decimal::ZERO {
            return None;
        }
        Some((ask - bid) / mid * Decimal::from(10_000))
    }

    /// A crossed book (best bid >= best ask) means the reconstruction is corrupt
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Write a single absolute level, bypassing sequencing
    ///
    /// The continuity-checked feed manages its own sequence numbers and
    /// writes levels directly, pairing this with [`advance_watermark`].
    ///
    /// [`advance_watermark`]: OrderBook::advance_watermark
    pub fn set_level(&mut self, side: Side, price: Decimal, qty: Decimal) {
        match side {
            Side::Bid => self.sides.set_bid(price, qty),
            Side::Ask => self.sides.set_ask(price, qty),
        }
    }

    /// Advance the watermark without applying levels
    pub fn advance_watermark(&mut self, sequence_id: u64) {
        self.last_sequence_id = sequence_id;
    }

    /// Replace the whole book from a snapshot
    ///
    /// Clears both sides, loads the snapshot levels, sets the watermark and
    /// arms the bridge requirement for the next delta.
    pub fn apply_snapshot(&mut self, bids: &[Level], asks: &[Level], last_update_id: u64) {
        self.sides.clear();
        for bid in bids {
            self.sides.set_bid(bid.price, bid.qty);
        }
        for ask in asks {
            self.sides.set_ask(ask.price, ask.qty);
        }
        self.last_sequence_id = last_update_id;
        self.awaiting_bridge = true;
    }

    /// Apply a sequenced delta
    ///
    /// Returns the outcome without logging; the caller decides what a
    /// rejection means for the feed (resync, reconnect, counting).
    pub fn apply_update(
        &mut self,
        bids: &[Level],
        asks: &[Level],
        first_id: u64,
        final_id: u64,
    ) -> UpdateOutcome {
        if self.awaiting_bridge {
            let next = self.last_sequence_id + 1;
            if first_id <= next && next <= final_id {
                self.apply_levels(bids, asks);
                self.last_sequence_id = final_id;
                self.awaiting_bridge = false;
                UpdateOutcome::Applied
            } else {
                UpdateOutcome::BridgeMismatch
            }
        } else if final_id <= self.last_sequence_id {
            UpdateOutcome::Stale
        } else if first_id < self.last_sequence_id {
            UpdateOutcome::Backwards
        } else {
            // Contiguous or gapped forward: both accepted
            self.apply_levels(bids, asks);
            self.last_sequence_id = final_id;
            UpdateOutcome::Applied
        }
    }

    fn apply_levels(&mut self, bids: &[Level], asks: &[Level]) {
        for bid in bids {
            self.sides.set_bid(bid.price, bid.qty);
        }
        for ask in asks {
            self.sides.set_ask(ask.price, ask.qty);
        }
    }

    /// Top-of-book view truncated to `levels` per side
    pub fn depth(&self, levels: usize) -> DepthView {
        DepthView {
            bids: self.sides.top_bids(levels),
            asks: self.sides.top_asks(levels),
        }
    }

    /// CRC32 over the top `depth` levels of each side
    pub fn checksum(&self, depth: usize) -> u32 {
        compute_checksum(
            &self.sides.top_bids(depth),
            &self.sides.top_asks(depth),
            depth,
        )
    }

    /// Checksum at the default depth
    pub fn default_checksum(&self) -> u32 {
        self.checksum(DEFAULT_CHECKSUM_DEPTH)
    }

    /// Reset to the empty, unsequenced state
    pub fn clear(&mut self) {
        self.sides.clear();
        self.last_sequence_id = 0;
        self.awaiting_bridge = false;
    }

    /// Serializable summary of current state
    pub fn stats(&self) -> BookStats {
        BookStats {
            symbol: self.symbol.clone(),
            bid_levels: self.bid_count(),
            ask_levels: self.ask_count(),
            best_bid: self.best_bid().map(|(p, _)| p),
            best_ask: self.best_ask().map(|(p, _)| p),
            mid_price: self.mid_price(),
            spread_bps: self.spread_bps(),
            last_sequence_id: self.last_sequence_id,
            awaiting_bridge: self.awaiting_bridge,
        }
    }

    /// Total quantity on the bid side over the top `levels`, as f64
    pub fn bid_depth(&self, levels: usize) -> f64 {
        self.sides
            .bids()
            .take(levels)
            .filter_map(|l| l.qty.to_f64())
            .sum()
    }

    /// Total quantity on the ask side over the top `levels`, as f64
    pub fn ask_depth(&self, levels: usize) -> f64 {
        self.sides
            .asks()
            .take(levels)
            .filter_map(|l| l.qty.to_f64())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(entries: &[(f64, f64)]) -> Vec<Level> {
        entries.iter().map(|&(p, q)| Level::from_f64(p, q)).collect()
    }

    fn snapshot_book() -> OrderBook {
        let mut book = OrderBook::new("BTCUSDT");
        book.apply_snapshot(
            &levels(&[(50000.0, 1.5), (49999.0, 2.0), (49998.0, 3.0)]),
            &levels(&[(50001.0, 1.0), (50002.0, 2.5), (50003.0, 4.0)]),
            100,
        );
        book
    }

    #[test]
    fn test_snapshot_loads_sorted_positive_levels() {
        let book = snapshot_book();

        assert_eq!(book.bid_count(), 3);
        assert_eq!(book.ask_count(), 3);
        assert_eq!(book.best_bid(), Some((dec!(50000), dec!(1.5))));
        assert_eq!(book.best_ask(), Some((dec!(50001), dec!(1))));
        assert_eq!(book.last_sequence_id(), 100);
        assert!(book.is_awaiting_bridge());
        assert!(!book.is_crossed());

        let view = book.depth(10);
        assert!(view.bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(view.asks.windows(2).all(|w| w[0].price < w[1].price));
        assert!(view.bids.iter().chain(&view.asks).all(|l| l.qty > Decimal::ZERO));
    }

    #[test]
    fn test_bridge_accepts_spanning_delta() {
        let mut book = snapshot_book();

        // Spans watermark+1 = 101
        let outcome = book.apply_update(&levels(&[(50000.0, 2.0)]), &[], 99, 103);
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert!(!book.is_awaiting_bridge());
        assert_eq!(book.last_sequence_id(), 103);
        assert_eq!(book.best_bid(), Some((dec!(50000), dec!(2))));
    }

    #[test]
    fn test_bridge_rejects_non_spanning_delta() {
        let mut book = snapshot_book();

        // Starts past watermark+1: cannot prove continuity with the snapshot
        let outcome = book.apply_update(&levels(&[(50000.0, 9.0)]), &[], 105, 110);
        assert_eq!(outcome, UpdateOutcome::BridgeMismatch);
        assert!(outcome.is_desync());
        assert!(book.is_awaiting_bridge());
        // Book untouched
        assert_eq!(book.best_bid(), Some((dec!(50000), dec!(1.5))));
        assert_eq!(book.last_sequence_id(), 100);
    }

    #[test]
    fn test_duplicate_final_id_is_idempotent() {
        let mut book = snapshot_book();
        book.apply_update(&levels(&[(50000.0, 2.0)]), &[], 99, 103);
        let before = book.checksum(10);

        // Same ids again: skipped without mutation
        let outcome = book.apply_update(&levels(&[(50000.0, 7.0)]), &[], 99, 103);
        assert_eq!(outcome, UpdateOutcome::Stale);
        assert!(!outcome.is_applied());
        assert_eq!(book.checksum(10), before);
        assert_eq!(book.last_sequence_id(), 103);
    }

    #[test]
    fn test_forward_gap_is_tolerated() {
        let mut book = snapshot_book();
        book.apply_update(&[], &levels(&[(50001.0, 1.5)]), 99, 103);

        // 104..150 never arrives; the venue aggregates under load
        let outcome = book.apply_update(&[], &levels(&[(50002.0, 1.0)]), 150, 160);
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(book.last_sequence_id(), 160);
    }

    #[test]
    fn test_backwards_delta_rejected() {
        let mut book = snapshot_book();
        book.apply_update(&[], &levels(&[(50001.0, 1.5)]), 99, 110);

        // Starts before the watermark but claims to extend beyond it
        let outcome = book.apply_update(&[], &levels(&[(50001.0, 9.9)]), 105, 115);
        assert_eq!(outcome, UpdateOutcome::Backwards);
        assert!(outcome.is_desync());
        assert_eq!(book.best_ask(), Some((dec!(50001), dec!(1.5))));
    }

    #[test]
    fn test_zero_qty_delta_removes_level() {
        let mut book = snapshot_book();
        book.apply_update(&levels(&[(49999.0, 0.0)]), &[], 99, 103);
        assert_eq!(book.bid_count(), 2);
    }

    #[test]
    fn test_crossed_book_detection() {
        let mut book = OrderBook::new("BTCUSDT");
        book.set_level(Side::Bid, dec!(50005), dec!(1));
        book.set_level(Side::Ask, dec!(50001), dec!(1));
        assert!(book.is_crossed());

        book.set_level(Side::Bid, dec!(50005), dec!(0));
        book.set_level(Side::Bid, dec!(50000), dec!(1));
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_mid_and_spread() {
        let book = snapshot_book();
        assert_eq!(book.mid_price(), Some(dec!(50000.5)));

        let spread_bps = book.spread_bps().unwrap();
        // 1 / 50000.5 * 10000 ≈ 0.2 bps
        assert!(spread_bps > dec!(0.19) && spread_bps < dec!(0.21));

        let empty = OrderBook::new("BTCUSDT");
        assert_eq!(empty.mid_price(), None);
        assert_eq!(empty.spread_bps(), None);
        assert!(!empty.is_crossed());
    }

    #[test]
    fn test_clear_resets_state() {
        let mut book = snapshot_book();
        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.last_sequence_id(), 0);
        assert!(!book.is_awaiting_bridge());
    }

    #[test]
    fn test_depth_truncation() {
        let book = snapshot_book();
        let view = book.depth(2);
        assert_eq!(view.bids.len(), 2);
        assert_eq!(view.asks.len(), 2);
        assert_eq!(view.mid_price(), Some(50000.5));
    }

    #[test]
    fn test_stats_serializes() {
        let book = snapshot_book();
        let stats = book.stats();
        assert_eq!(stats.bid_levels, 3);
        assert_eq!(stats.last_sequence_id, 100);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"symbol\":\"BTCUSDT\""));
    }

    #[test]
    fn test_side_depth_sums() {
        let book = snapshot_book();
        assert!((book.bid_depth(10) - 6.5).abs() < 1e-9);
        assert!((book.ask_depth(2) - 3.5).abs() < 1e-9);
    }
}
