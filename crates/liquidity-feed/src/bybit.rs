//! Continuity-checked feed (Bybit v5 style)
//!
//! The venue pushes a full snapshot on subscription, then deltas whose
//! update ids should increment by one. Stale deltas are discarded; gaps are
//! counted and logged but applied anyway (the venue aggregates under load).
//! The *sole* hard resynchronization trigger is a crossed book after a delta:
//! that means the reconstruction is corrupt, so the monitor clears state and
//! forces a full reconnect to obtain a fresh snapshot.

use crate::error::{FeedError, FeedResult};
use crate::latency::{LatencyConfig, LatencyTracker};
use crate::reconnect::ReconnectPolicy;
use crate::sync::{ConnectionState, FeedCounters, FeedStatus, FeedSynchronizer, SyncState};
use crate::transport::{Connector, Transport, WsConnector};
use async_trait::async_trait;
use liquidity_book::OrderBook;
use liquidity_types::{BybitBookData, BybitBookMessage, Side};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Configuration for the continuity-checked feed
#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub symbol: String,
    pub ws_url: String,
    /// Book depth to subscribe to
    pub depth: u32,
    /// How long to wait for the pushed snapshot after subscribing
    pub snapshot_wait: Duration,
    /// Monitor poll interval once synchronized
    pub monitor_poll: Duration,
    /// Warn once a session exceeds this many sequence gaps
    pub gap_warn_threshold: u64,
    /// Error above this many gaps; the book is probably rotten
    pub gap_corruption_threshold: u64,
    pub latency: LatencyConfig,
    pub reconnect: ReconnectPolicy,
}

impl BybitConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ws_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
            depth: 50,
            snapshot_wait: Duration::from_secs(10),
            monitor_poll: Duration::from_millis(500),
            gap_warn_threshold: 5,
            gap_corruption_threshold: 1000,
            latency: LatencyConfig::with_thresholds(100.0, 200.0),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_snapshot_wait(mut self, wait: Duration) -> Self {
        self.snapshot_wait = wait;
        self
    }

    pub fn with_monitor_poll(mut self, poll: Duration) -> Self {
        self.monitor_poll = poll;
        self
    }

    /// Topic string for the subscribe frame
    pub fn topic(&self) -> String {
        format!("orderbook.{}.{}", self.depth, self.symbol)
    }
}

const EXCHANGE: &str = "bybit";

struct Shared {
    config: BybitConfig,
    book: Arc<RwLock<OrderBook>>,
    connection: RwLock<ConnectionState>,
    sync: RwLock<SyncState>,
    counters: FeedCounters,
    latency: Mutex<LatencyTracker>,
    last_processed: AtomicU64,
    stop: AtomicBool,
}

/// Continuity-checked order book feed
pub struct BybitFeed {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
}

impl BybitFeed {
    /// Feed with a live WebSocket connector
    pub fn new(config: BybitConfig) -> Self {
        let connector = Arc::new(WsConnector::new(&config.ws_url));
        Self::with_connector(config, connector)
    }

    /// Feed with an injected connector
    pub fn with_connector(config: BybitConfig, connector: Arc<dyn Connector>) -> Self {
        let latency = LatencyTracker::new(config.latency.clone());
        let book = Arc::new(RwLock::new(OrderBook::new(config.symbol.clone())));
        Self {
            shared: Arc::new(Shared {
                config,
                book,
                connection: RwLock::new(ConnectionState::Disconnected),
                sync: RwLock::new(SyncState::Unsynchronized),
                counters: FeedCounters::default(),
                latency: Mutex::new(latency),
                last_processed: AtomicU64::new(0),
                stop: AtomicBool::new(false),
            }),
            connector,
        }
    }

    fn stopping(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    async fn run_loop(&self) -> FeedResult<()> {
        let mut attempt: u32 = 0;
        while !self.stopping() {
            if !self.shared.config.reconnect.should_reconnect(attempt) {
                error!(exchange = EXCHANGE, attempt, "reconnect budget exhausted");
                return Err(FeedError::ReconnectExhausted { attempts: attempt });
            }
            if attempt > 0 {
                let delay = self.shared.config.reconnect.delay_with_jitter(attempt);
                warn!(exchange = EXCHANGE, attempt, ?delay, "reconnecting after backoff");
                tokio::time::sleep(delay).await;
                if self.stopping() {
                    break;
                }
                self.shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            }

            match self.run_session(&mut attempt).await {
                Ok(()) => break, // graceful stop
                Err(err) => {
                    if self.stopping() {
                        break;
                    }
                    warn!(exchange = EXCHANGE, error = %err, "session ended");
                    attempt += 1;
                }
            }
        }

        *self.shared.connection.write() = ConnectionState::Disconnected;
        *self.shared.sync.write() = SyncState::Unsynchronized;
        info!(exchange = EXCHANGE, "feed stopped");
        Ok(())
    }

    async fn run_session(&self, attempt: &mut u32) -> FeedResult<()> {
        *self.shared.connection.write() = ConnectionState::Connecting;
        *self.shared.sync.write() = SyncState::Unsynchronized;
        self.shared.last_processed.store(0, Ordering::Relaxed);
        self.shared.book.write().clear();

        let mut transport = self.connector.connect().await?;
        let subscribe = serde_json::json!({
            "op": "subscribe",
            "args": [self.shared.config.topic()],
        })
        .to_string();
        transport.send(&subscribe).await.map_err(FeedError::from)?;
        info!(
            exchange = EXCHANGE,
            endpoint = self.connector.endpoint(),
            topic = self.shared.config.topic(),
            "connected and subscribed"
        );
        *self.shared.connection.write() = ConnectionState::Connected;
        *self.shared.sync.write() = SyncState::Synchronizing;

        let listener = tokio::spawn(listen(self.shared.clone(), transport));
        let result = self.monitor(&listener, attempt).await;
        listener.abort();
        *self.shared.connection.write() = ConnectionState::Disconnected;
        result
    }

    /// Wait for the pushed snapshot, then watch for corruption
    async fn monitor(&self, listener: &JoinHandle<()>, attempt: &mut u32) -> FeedResult<()> {
        let deadline = Instant::now() + self.shared.config.snapshot_wait;
        while *self.shared.sync.read() != SyncState::Synchronized {
            if self.stopping() {
                return Ok(());
            }
            if listener.is_finished() {
                return Err(FeedError::ListenerStopped);
            }
            if Instant::now() >= deadline {
                return Err(FeedError::SnapshotTimeout(self.shared.config.snapshot_wait));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        *attempt = 0;

        loop {
            if self.stopping() {
                return Ok(());
            }
            if listener.is_finished() {
                return Err(FeedError::ListenerStopped);
            }
            if *self.shared.sync.read() != SyncState::Synchronized {
                // Corrupt reconstruction: rebuild from a fresh subscription
                self.shared.book.write().clear();
                self.shared.last_processed.store(0, Ordering::Relaxed);
                return Err(FeedError::Desynchronized {
                    reason: "crossed book".into(),
                });
            }
            tokio::time::sleep(self.shared.config.monitor_poll).await;
        }
    }
}

/// Listener task: sole reader of the transport
async fn listen(shared: Arc<Shared>, mut transport: Box<dyn Transport>) {
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            let _ = transport.close().await;
            return;
        }
        match transport.recv().await {
            Ok(Some(text)) => {
                let message: BybitBookMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(err) => {
                        debug!(exchange = EXCHANGE, error = %err, "dropping unparseable frame");
                        continue;
                    }
                };
                shared.counters.messages.fetch_add(1, Ordering::Relaxed);
                if message.is_book_update() {
                    handle_book_message(&shared, message);
                }
            }
            Ok(None) => {
                info!(exchange = EXCHANGE, "connection closed by server");
                return;
            }
            Err(err) => {
                warn!(exchange = EXCHANGE, error = %err, "receive failed");
                return;
            }
        }
    }
}

fn handle_book_message(shared: &Shared, message: BybitBookMessage) {
    if let Some(ts) = message.ts {
        shared.latency.lock().record(ts as f64);
    }
    let Some(data) = message.data else { return };

    match message.message_type.as_deref() {
        Some("snapshot") => {
            let mut book = shared.book.write();
            book.clear();
            for level in &data.bids {
                book.set_level(Side::Bid, level.price, level.qty);
            }
            for level in &data.asks {
                book.set_level(Side::Ask, level.price, level.qty);
            }
            book.advance_watermark(data.update_id);
            let (bid_levels, ask_levels) = (book.bid_count(), book.ask_count());
            drop(book);

            shared.last_processed.store(data.update_id, Ordering::Relaxed);
            *shared.sync.write() = SyncState::Synchronized;
            info!(
                exchange = EXCHANGE,
                update_id = data.update_id,
                bid_levels,
                ask_levels,
                "snapshot applied"
            );
        }
        Some("delta") => {
            // Pre-snapshot deltas are useless; the snapshot supersedes them
            if *shared.sync.read() != SyncState::Synchronized {
                return;
            }
            apply_delta(shared, &data);
        }
        other => {
            debug!(exchange = EXCHANGE, message_type = ?other, "ignoring book message type");
        }
    }
}

fn apply_delta(shared: &Shared, data: &BybitBookData) {
    let last = shared.last_processed.load(Ordering::Relaxed);

    if last > 0 && data.update_id <= last {
        trace!(
            exchange = EXCHANGE,
            update_id = data.update_id,
            last,
            "discarding stale delta"
        );
        return;
    }

    if last > 0 && data.update_id != last + 1 {
        let gap = data.update_id - last - 1;
        shared.counters.sequence_gaps.fetch_add(1, Ordering::Relaxed);
        // The venue aggregates under load; gaps are applied regardless. The
        // crossed-book check decides whether to reconnect, not the gap size.
        if gap > shared.config.gap_corruption_threshold {
            error!(
                exchange = EXCHANGE,
                gap,
                update_id = data.update_id,
                "huge sequence gap, applying anyway but book integrity is doubtful"
            );
        } else if gap > shared.config.gap_warn_threshold {
            warn!(exchange = EXCHANGE, gap, update_id = data.update_id, "sequence gap");
        }
    }

    let mut book = shared.book.write();
    for level in &data.bids {
        book.set_level(Side::Bid, level.price, level.qty);
    }
    for level in &data.asks {
        book.set_level(Side::Ask, level.price, level.qty);
    }
    book.advance_watermark(data.update_id);
    let crossed = book.is_crossed();
    drop(book);

    shared.last_processed.store(data.update_id, Ordering::Relaxed);

    if crossed {
        shared.counters.crossed_books.fetch_add(1, Ordering::Relaxed);
        error!(
            exchange = EXCHANGE,
            update_id = data.update_id,
            "book crossed after delta, forcing resynchronization"
        );
        *shared.sync.write() = SyncState::Unsynchronized;
    }
}

#[async_trait]
impl FeedSynchronizer for BybitFeed {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    fn symbol(&self) -> &str {
        &self.shared.config.symbol
    }

    async fn run(&self) -> FeedResult<()> {
        self.run_loop().await
    }

    fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    fn is_synchronized(&self) -> bool {
        *self.shared.sync.read() == SyncState::Synchronized
    }

    fn book(&self) -> Arc<RwLock<OrderBook>> {
        self.shared.book.clone()
    }

    fn status(&self) -> FeedStatus {
        FeedStatus {
            exchange: EXCHANGE.to_string(),
            symbol: self.shared.config.symbol.clone(),
            connected: *self.shared.connection.read() == ConnectionState::Connected,
            synchronized: self.is_synchronized(),
            counters: self.shared.counters.snapshot(),
            buffered_events: 0,
            book: self.shared.book.read().stats(),
            latency: self.shared.latency.lock().summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockConnector, MockTransport};
    use rust_decimal_macros::dec;

    fn test_config() -> BybitConfig {
        BybitConfig::new("BTCUSDT")
            .with_snapshot_wait(Duration::from_secs(2))
            .with_monitor_poll(Duration::from_millis(10))
            .with_reconnect(
                ReconnectPolicy::default().with_initial_delay(Duration::from_millis(10)),
            )
    }

    fn snapshot_frame(update_id: u64) -> String {
        format!(
            r#"{{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1700000000000,"data":{{"s":"BTCUSDT","b":[["50000.00","1.5"],["49999.00","2.0"]],"a":[["50001.00","1.0"],["50002.00","3.0"]],"u":{update_id},"seq":1}}}}"#
        )
    }

    fn delta_frame(update_id: u64, bids: &str, asks: &str) -> String {
        format!(
            r#"{{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1700000000100,"data":{{"s":"BTCUSDT","b":{bids},"a":{asks},"u":{update_id},"seq":2}}}}"#
        )
    }

    fn parse(frame: &str) -> BybitBookMessage {
        serde_json::from_str(frame).unwrap()
    }

    fn seeded_feed() -> BybitFeed {
        let feed = BybitFeed::with_connector(test_config(), Arc::new(MockConnector::new()));
        handle_book_message(&feed.shared, parse(&snapshot_frame(100)));
        feed
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_snapshot_seeds_book() {
        let feed = seeded_feed();
        assert!(feed.is_synchronized());

        let book = feed.shared.book.read();
        assert_eq!(book.best_bid(), Some((dec!(50000.00), dec!(1.5))));
        assert_eq!(book.best_ask(), Some((dec!(50001.00), dec!(1.0))));
        assert_eq!(book.last_sequence_id(), 100);
        assert!(!book.is_awaiting_bridge());
    }

    #[test]
    fn test_delta_advances_book() {
        let feed = seeded_feed();
        handle_book_message(
            &feed.shared,
            parse(&delta_frame(101, r#"[["50000.00","2.5"]]"#, r#"[["50002.00","0"]]"#)),
        );

        let book = feed.shared.book.read();
        assert_eq!(book.best_bid(), Some((dec!(50000.00), dec!(2.5))));
        assert_eq!(book.ask_count(), 1);
        assert_eq!(book.last_sequence_id(), 101);
    }

    #[test]
    fn test_stale_delta_discarded() {
        let feed = seeded_feed();
        let before = feed.shared.book.read().checksum(10);

        // update_id at the watermark: already incorporated
        handle_book_message(
            &feed.shared,
            parse(&delta_frame(100, r#"[["50000.00","9.9"]]"#, "[]")),
        );

        assert_eq!(feed.shared.book.read().checksum(10), before);
        assert_eq!(feed.shared.last_processed.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_gap_counted_but_applied() {
        let feed = seeded_feed();
        handle_book_message(
            &feed.shared,
            parse(&delta_frame(150, r#"[["49998.00","1.0"]]"#, "[]")),
        );

        assert_eq!(
            feed.shared.counters.sequence_gaps.load(Ordering::Relaxed),
            1
        );
        // Applied despite the gap
        assert_eq!(feed.shared.last_processed.load(Ordering::Relaxed), 150);
        assert_eq!(feed.shared.book.read().bid_count(), 3);
        assert!(feed.is_synchronized());
    }

    #[test]
    fn test_crossed_book_is_sole_resync_trigger() {
        let feed = seeded_feed();

        // Bid through the best ask: corrupt
        handle_book_message(
            &feed.shared,
            parse(&delta_frame(101, r#"[["50005.00","1.0"]]"#, "[]")),
        );

        assert!(!feed.is_synchronized());
        assert_eq!(
            feed.shared.counters.crossed_books.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_pre_snapshot_delta_ignored() {
        let feed = BybitFeed::with_connector(test_config(), Arc::new(MockConnector::new()));
        handle_book_message(
            &feed.shared,
            parse(&delta_frame(5, r#"[["50000.00","1.0"]]"#, "[]")),
        );

        assert!(feed.shared.book.read().is_empty());
        assert!(!feed.is_synchronized());
    }

    #[tokio::test]
    async fn test_full_session_with_crossed_recovery() {
        let connector = Arc::new(MockConnector::new());

        // Session 1: snapshot, then a delta that crosses the book
        let mut first = MockTransport::new().hold_open();
        first.push_text(r#"{"success":true,"op":"subscribe"}"#);
        first.push_text(snapshot_frame(100));
        first.push_text(delta_frame(101, r#"[["50005.00","1.0"]]"#, "[]"));
        connector.push_session(first);

        // Session 2: clean snapshot
        let mut second = MockTransport::new().hold_open();
        second.push_text(snapshot_frame(200));
        connector.push_session(second);

        let feed = Arc::new(BybitFeed::with_connector(test_config(), connector.clone()));
        let runner = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.run().await })
        };

        assert!(
            wait_for(
                || feed.is_synchronized()
                    && feed.shared.last_processed.load(Ordering::Relaxed) == 200,
                Duration::from_secs(5)
            )
            .await,
            "feed never recovered from the crossed book"
        );

        // Both sessions subscribed
        let subscribes = connector
            .sent()
            .iter()
            .filter(|frame| frame.contains("\"op\":\"subscribe\""))
            .count();
        assert_eq!(subscribes, 2);
        assert!(feed.status().counters.crossed_book_count >= 1);

        feed.stop();
        runner.await.unwrap().unwrap();
    }
}
