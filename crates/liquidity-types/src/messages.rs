//! Venue wire message shapes
//!
//! Only the fields the feeds actually consume are modelled; everything else
//! in a frame is ignored by serde. Parse failures are the caller's signal to
//! drop the frame, not to tear the connection down.

use crate::Level;
use serde::Deserialize;

/// Binance futures diff-depth stream event
///
/// `U`/`u` bracket the aggregated update ids covered by this event. A feed
/// buffers these until a REST snapshot provides the watermark to bridge from.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceDepthEvent {
    /// Event type, "depthUpdate" on the depth stream
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    /// Event time in epoch milliseconds
    #[serde(rename = "E", default)]
    pub event_time_ms: Option<u64>,
    #[serde(rename = "s", default)]
    pub symbol: Option<String>,
    /// First update id covered by this event
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update id covered by this event
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b", default)]
    pub bids: Vec<Level>,
    #[serde(rename = "a", default)]
    pub asks: Vec<Level>,
}

/// REST depth snapshot (Binance `/fapi/v1/depth` shape)
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    #[serde(default)]
    pub bids: Vec<Level>,
    #[serde(default)]
    pub asks: Vec<Level>,
}

/// Bybit orderbook stream envelope
///
/// Subscription acks arrive on the same socket without a `topic`; the feed
/// ignores anything that is not a `snapshot` or `delta` book message.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitBookMessage {
    #[serde(default)]
    pub topic: Option<String>,
    /// "snapshot" or "delta"
    #[serde(rename = "type", default)]
    pub message_type: Option<String>,
    /// Gateway timestamp in epoch milliseconds
    #[serde(default)]
    pub ts: Option<u64>,
    #[serde(default)]
    pub data: Option<BybitBookData>,
}

/// Payload of a Bybit orderbook message
#[derive(Debug, Clone, Deserialize)]
pub struct BybitBookData {
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<Level>,
    #[serde(rename = "a", default)]
    pub asks: Vec<Level>,
    /// Update id; consecutive deltas should increment this by one
    #[serde(rename = "u")]
    pub update_id: u64,
    /// Cross-sequence number, present on linear/inverse books
    #[serde(default)]
    pub seq: Option<u64>,
}

impl BybitBookMessage {
    /// True for book messages carrying a payload (snapshot or delta)
    pub fn is_book_update(&self) -> bool {
        self.topic.is_some() && self.data.is_some()
    }
}
