//! Stateless liquidity metrics
//!
//! All metrics operate on a point-in-time depth view: bids sorted high to
//! low, asks low to high. Computation runs in `f64`; exact decimals matter
//! for book reconstruction, not for risk estimates.

use liquidity_types::Level;
use serde::Serialize;
use thiserror::Error;

/// A fill is "complete" when the unfilled remainder is below this (quote units)
pub const FILL_EPSILON: f64 = 0.01;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("order book side is empty")]
    EmptyBook,
    #[error("book absorbed nothing of a {0} quote order")]
    InsufficientLiquidity(f64),
    #[error("invalid trade size: {0}")]
    InvalidTradeSize(f64),
}

/// Which side of the book a simulated market order consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TakerSide {
    /// Consumes asks
    Buy,
    /// Consumes bids
    Sell,
}

/// Result of walking the book with a simulated market order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlippageEstimate {
    pub side: TakerSide,
    /// Requested size in quote currency
    pub trade_size: f64,
    pub average_price: f64,
    /// Quote-currency cost of walking away from mid
    pub slippage: f64,
    /// Slippage relative to mid, in basis points
    pub slippage_bps: f64,
    pub levels_consumed: usize,
    pub filled: bool,
    /// Quote amount the book could not absorb
    pub unfilled: f64,
}

/// Depth available within a band around mid price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthAtBps {
    pub bps: u32,
    pub bid_qty: f64,
    pub bid_value: f64,
    pub ask_qty: f64,
    pub ask_value: f64,
    pub bid_levels: usize,
    pub ask_levels: usize,
}

impl DepthAtBps {
    /// Total quote value absorbed within the band, both sides
    pub fn total_value(&self) -> f64 {
        self.bid_value + self.ask_value
    }
}

fn mid_price(bids: &[Level], asks: &[Level]) -> Option<f64> {
    match (bids.first(), asks.first()) {
        (Some(bid), Some(ask)) => Some((bid.price_f64() + ask.price_f64()) / 2.0),
        _ => None,
    }
}

/// Estimate execution of a market order sized in quote currency
///
/// Walks the consumed side in book order, taking whole levels while the
/// remaining size exceeds the level's quote value and a partial fill of the
/// level where it does not. Sign convention: slippage is positive when the
/// fill is worse than mid (a sell below mid, a buy above mid).
pub fn estimate_slippage(
    bids: &[Level],
    asks: &[Level],
    trade_size: f64,
    side: TakerSide,
) -> Result<SlippageEstimate, RiskError> {
    if !(trade_size > 0.0) {
        return Err(RiskError::InvalidTradeSize(trade_size));
    }
    let mid = mid_price(bids, asks).ok_or(RiskError::EmptyBook)?;
    let levels = match side {
        TakerSide::Buy => asks,
        TakerSide::Sell => bids,
    };

    let mut remaining = trade_size;
    let mut filled_qty = 0.0;
    let mut filled_value = 0.0;
    let mut levels_consumed = 0;

    for level in levels {
        if remaining <= 0.0 {
            break;
        }
        let price = level.price_f64();
        let level_value = price * level.qty_f64();
        levels_consumed += 1;

        if level_value <= remaining {
            filled_qty += level.qty_f64();
            filled_value += level_value;
            remaining -= level_value;
        } else {
            let qty = remaining / price;
            filled_qty += qty;
            filled_value += remaining;
            remaining = 0.0;
        }
    }

    if filled_qty <= 0.0 {
        return Err(RiskError::InsufficientLiquidity(trade_size));
    }

    let average_price = filled_value / filled_qty;
    let slippage = match side {
        TakerSide::Buy => average_price - mid,
        TakerSide::Sell => mid - average_price,
    };
    let slippage_bps = slippage / mid * 10_000.0;

    Ok(SlippageEstimate {
        side,
        trade_size,
        average_price,
        slippage,
        slippage_bps,
        levels_consumed,
        filled: remaining <= FILL_EPSILON,
        unfilled: remaining,
    })
}

/// Depth imbalance over the top `levels` of each side
///
/// `(bid_volume - ask_volume) / (bid_volume + ask_volume)`, in [-1, 1].
/// Returns 0 when either side is empty or both volumes are zero.
pub fn depth_imbalance(bids: &[Level], asks: &[Level], levels: usize) -> f64 {
    if bids.is_empty() || asks.is_empty() {
        return 0.0;
    }
    let bid_volume: f64 = bids.iter().take(levels).map(Level::qty_f64).sum();
    let ask_volume: f64 = asks.iter().take(levels).map(Level::qty_f64).sum();
    let total = bid_volume + ask_volume;
    if total <= 0.0 {
        return 0.0;
    }
    (bid_volume - ask_volume) / total
}

/// Depth within `bps` basis points of mid price
///
/// Prefix scan: each side is walked from the top and stops at the first
/// level outside the band, which is correct because the inputs are sorted.
pub fn depth_at_bps(bids: &[Level], asks: &[Level], bps: u32) -> Result<DepthAtBps, RiskError> {
    let mid = mid_price(bids, asks).ok_or(RiskError::EmptyBook)?;
    let band = f64::from(bps) / 10_000.0;
    let bid_floor = mid * (1.0 - band);
    let ask_ceiling = mid * (1.0 + band);

    let mut result = DepthAtBps {
        bps,
        bid_qty: 0.0,
        bid_value: 0.0,
        ask_qty: 0.0,
        ask_value: 0.0,
        bid_levels: 0,
        ask_levels: 0,
    };

    for level in bids {
        let price = level.price_f64();
        if price < bid_floor {
            break;
        }
        result.bid_qty += level.qty_f64();
        result.bid_value += price * level.qty_f64();
        result.bid_levels += 1;
    }
    for level in asks {
        let price = level.price_f64();
        if price > ask_ceiling {
            break;
        }
        result.ask_qty += level.qty_f64();
        result.ask_value += price * level.qty_f64();
        result.ask_levels += 1;
    }

    Ok(result)
}
