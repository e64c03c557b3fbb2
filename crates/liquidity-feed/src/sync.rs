//! Shared synchronizer state and the `FeedSynchronizer` trait
//!
//! Both feed variants expose the same surface to the coordinator: a run loop
//! that owns reconnection, a stop flag, a shared book, and a serializable
//! status built from atomic counters.

use crate::error::FeedResult;
use crate::latency::LatencySummary;
use async_trait::async_trait;
use liquidity_book::{BookStats, OrderBook};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Socket-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Book-level synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Book is invalid or empty
    Unsynchronized,
    /// A synchronization cycle is in progress
    Synchronizing,
    /// Book mirrors the venue
    Synchronized,
}

/// Monotonic per-feed counters, written from the listener task
#[derive(Debug, Default)]
pub struct FeedCounters {
    pub messages: AtomicU64,
    pub reconnects: AtomicU64,
    pub sequence_gaps: AtomicU64,
    pub crossed_books: AtomicU64,
}

/// Point-in-time copy of [`FeedCounters`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CounterSnapshot {
    pub message_count: u64,
    pub reconnect_count: u64,
    pub sequence_gap_count: u64,
    pub crossed_book_count: u64,
}

impl FeedCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            message_count: self.messages.load(Ordering::Relaxed),
            reconnect_count: self.reconnects.load(Ordering::Relaxed),
            sequence_gap_count: self.sequence_gaps.load(Ordering::Relaxed),
            crossed_book_count: self.crossed_books.load(Ordering::Relaxed),
        }
    }
}

/// Serializable status of one feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    pub exchange: String,
    pub symbol: String,
    pub connected: bool,
    pub synchronized: bool,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    /// Events waiting for a snapshot bridge (zero for continuity-checked feeds)
    pub buffered_events: usize,
    pub book: BookStats,
    pub latency: LatencySummary,
}

/// One venue's order book feed
#[async_trait]
pub trait FeedSynchronizer: Send + Sync {
    /// Stable lowercase venue name ("binance", "bybit")
    fn exchange(&self) -> &str;

    /// Symbol this feed tracks
    fn symbol(&self) -> &str;

    /// Run until [`stop`] is called, reconnecting internally with backoff
    ///
    /// [`stop`]: FeedSynchronizer::stop
    async fn run(&self) -> FeedResult<()>;

    /// Signal the run loop to wind down
    fn stop(&self);

    /// Whether the book currently mirrors the venue
    fn is_synchronized(&self) -> bool;

    /// Shared handle to the reconstructed book
    fn book(&self) -> Arc<RwLock<OrderBook>>;

    /// Current status snapshot
    fn status(&self) -> FeedStatus;
}
