//! Buffer-then-bridge feed (Binance futures style)
//!
//! The stream has no pushed snapshot, so reconstruction interleaves two
//! channels:
//!
//! ```text
//! connect ──> listener buffers deltas
//!                │
//!                ▼
//!    warm-up (≥ min events or timeout)
//!                │
//!                ▼
//!    REST snapshot at watermark W ──fail──> retry delay, next attempt
//!                │
//!                ▼
//!    replay buffer: drop final_id ≤ W, find bridge
//!    (first_id ≤ W+1 ≤ final_id), apply the rest
//!        │ no bridge: keep buffer, next attempt
//!        ▼
//!    synchronized: listener applies deltas live
//! ```
//!
//! Live sequencing violations flip the feed back to unsynchronized and the
//! supervisor starts a new cycle on the same connection; the buffer refills
//! while that happens.

use crate::error::{FeedError, FeedResult};
use crate::latency::{LatencyConfig, LatencyTracker};
use crate::reconnect::ReconnectPolicy;
use crate::snapshot::{RestSnapshotSource, SnapshotSource};
use crate::sync::{ConnectionState, FeedCounters, FeedStatus, FeedSynchronizer, SyncState};
use crate::transport::{Connector, Transport, WsConnector};
use async_trait::async_trait;
use liquidity_book::{OrderBook, UpdateOutcome};
use liquidity_types::BinanceDepthEvent;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Configuration for the buffer-then-bridge feed
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub symbol: String,
    pub ws_url: String,
    pub rest_url: String,
    /// Levels requested per side in the REST snapshot
    pub snapshot_depth: u32,
    /// Buffered events required before fetching a snapshot
    pub min_buffered_events: usize,
    /// Warm-up timeout on the first sync attempt
    pub warmup_timeout: Duration,
    /// Extra warm-up time granted per subsequent attempt
    pub warmup_timeout_step: Duration,
    /// Synchronization attempts per cycle
    pub max_sync_attempts: u32,
    /// Sleep after a failed snapshot fetch
    pub snapshot_retry_delay: Duration,
    /// Wait after applying the snapshot before replaying the buffer
    pub post_snapshot_wait: Duration,
    /// Log a local checksum every N applied messages (0 disables)
    pub checksum_interval: u64,
    /// Bounded buffer size; oldest events are dropped beyond this
    pub buffer_capacity: usize,
    /// Supervisor poll interval while synchronized
    pub supervise_poll: Duration,
    pub latency: LatencyConfig,
    pub reconnect: ReconnectPolicy,
}

impl BinanceConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self {
            ws_url: format!(
                "wss://fstream.binance.com/ws/{}@depth@100ms",
                symbol.to_lowercase()
            ),
            rest_url: "https://fapi.binance.com".to_string(),
            symbol,
            snapshot_depth: 1000,
            min_buffered_events: 10,
            warmup_timeout: Duration::from_secs(10),
            warmup_timeout_step: Duration::from_secs(5),
            max_sync_attempts: 3,
            snapshot_retry_delay: Duration::from_secs(5),
            post_snapshot_wait: Duration::from_secs(1),
            checksum_interval: 100,
            buffer_capacity: 1000,
            supervise_poll: Duration::from_millis(500),
            latency: LatencyConfig::with_thresholds(50.0, 100.0),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_max_sync_attempts(mut self, attempts: u32) -> Self {
        self.max_sync_attempts = attempts;
        self
    }

    pub fn with_min_buffered_events(mut self, min: usize) -> Self {
        self.min_buffered_events = min;
        self
    }

    /// Shrink every timing knob; test configs build on this
    pub fn with_timings(
        mut self,
        warmup_timeout: Duration,
        snapshot_retry_delay: Duration,
        post_snapshot_wait: Duration,
        supervise_poll: Duration,
    ) -> Self {
        self.warmup_timeout = warmup_timeout;
        self.warmup_timeout_step = warmup_timeout;
        self.snapshot_retry_delay = snapshot_retry_delay;
        self.post_snapshot_wait = post_snapshot_wait;
        self.supervise_poll = supervise_poll;
        self
    }
}

const EXCHANGE: &str = "binance";

struct Shared {
    config: BinanceConfig,
    book: Arc<RwLock<OrderBook>>,
    buffer: Mutex<VecDeque<BinanceDepthEvent>>,
    connection: RwLock<ConnectionState>,
    sync: RwLock<SyncState>,
    counters: FeedCounters,
    latency: Mutex<LatencyTracker>,
    stop: AtomicBool,
}

/// Buffer-then-bridge order book feed
pub struct BinanceFeed {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    snapshots: Arc<dyn SnapshotSource>,
}

impl BinanceFeed {
    /// Feed with live WebSocket and REST sources
    pub fn new(config: BinanceConfig) -> FeedResult<Self> {
        let connector = Arc::new(WsConnector::new(&config.ws_url));
        let snapshots = Arc::new(RestSnapshotSource::new(
            &config.rest_url,
            &config.symbol,
            config.snapshot_depth,
        )?);
        Ok(Self::with_sources(config, connector, snapshots))
    }

    /// Feed with injected transport and snapshot sources
    pub fn with_sources(
        config: BinanceConfig,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Self {
        let latency = LatencyTracker::new(config.latency.clone());
        let book = Arc::new(RwLock::new(OrderBook::new(config.symbol.clone())));
        Self {
            shared: Arc::new(Shared {
                config,
                book,
                buffer: Mutex::new(VecDeque::new()),
                connection: RwLock::new(ConnectionState::Disconnected),
                sync: RwLock::new(SyncState::Unsynchronized),
                counters: FeedCounters::default(),
                latency: Mutex::new(latency),
                stop: AtomicBool::new(false),
            }),
            connector,
            snapshots,
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
        self.shared.buffer.lock().clear();

        let transport = self.connector.connect().await?;
        info!(
            exchange = EXCHANGE,
            endpoint = self.connector.endpoint(),
            "connected"
        );
        *self.shared.connection.write() = ConnectionState::Connected;

        let listener = tokio::spawn(listen(self.shared.clone(), transport));
        let result = self.supervise(&listener, attempt).await;
        listener.abort();
        *self.shared.connection.write() = ConnectionState::Disconnected;
        result
    }

    /// Drive synchronization cycles for the lifetime of one connection
    async fn supervise(&self, listener: &JoinHandle<()>, attempt: &mut u32) -> FeedResult<()> {
        loop {
            if self.stopping() {
                return Ok(());
            }
            if listener.is_finished() {
                return Err(FeedError::ListenerStopped);
            }
            if *self.shared.sync.read() != SyncState::Synchronized {
                self.synchronize(listener).await?;
                *attempt = 0;
            }
            tokio::time::sleep(self.shared.config.supervise_poll).await;
        }
    }

    /// One synchronization cycle: up to `max_sync_attempts` tries
    async fn synchronize(&self, listener: &JoinHandle<()>) -> FeedResult<()> {
        *self.shared.sync.write() = SyncState::Synchronizing;
        let cfg = &self.shared.config;

        for sync_attempt in 0..cfg.max_sync_attempts {
            if self.stopping() {
                return Ok(());
            }
            if listener.is_finished() {
                return Err(FeedError::ListenerStopped);
            }

            // Warm-up: a thin buffer rarely contains a bridge
            let deadline =
                Instant::now() + cfg.warmup_timeout + cfg.warmup_timeout_step * sync_attempt;
            loop {
                let buffered = self.shared.buffer.lock().len();
                if buffered >= cfg.min_buffered_events {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        exchange = EXCHANGE,
                        buffered,
                        needed = cfg.min_buffered_events,
                        "warm-up timed out, proceeding anyway"
                    );
                    break;
                }
                if listener.is_finished() {
                    return Err(FeedError::ListenerStopped);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            let snapshot = match self.snapshots.fetch().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(
                        exchange = EXCHANGE,
                        error = %err,
                        sync_attempt,
                        "snapshot fetch failed"
                    );
                    tokio::time::sleep(cfg.snapshot_retry_delay).await;
                    continue;
                }
            };

            self.shared.book.write().apply_snapshot(
                &snapshot.bids,
                &snapshot.asks,
                snapshot.last_update_id,
            );
            debug!(
                exchange = EXCHANGE,
                watermark = snapshot.last_update_id,
                "snapshot applied, waiting for stream overlap"
            );

            // Let the stream run past the watermark before replaying
            tokio::time::sleep(cfg.post_snapshot_wait).await;

            match replay_buffer(&self.shared, snapshot.last_update_id) {
                Ok(applied) => {
                    let stats = self.shared.book.read().stats();
                    info!(
                        exchange = EXCHANGE,
                        applied,
                        bid_levels = stats.bid_levels,
                        ask_levels = stats.ask_levels,
                        watermark = stats.last_sequence_id,
                        "order book synchronized"
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        exchange = EXCHANGE,
                        error = %err,
                        sync_attempt,
                        "synchronization attempt failed"
                    );
                }
            }
        }

        Err(FeedError::SyncFailed {
            attempts: cfg.max_sync_attempts,
        })
    }
}

/// Replay buffered deltas over a fresh snapshot
///
/// On `BridgeNotFound` the buffer is deliberately left intact: the next
/// attempt fetches a newer snapshot and may bridge against the same events.
///
/// On success the sync state flips to `Synchronized` before the buffer lock
/// is released. The listener routes every event under that same lock, so no
/// event can slip into the buffer after the drain and sit there unapplied.
fn replay_buffer(shared: &Shared, watermark: u64) -> FeedResult<usize> {
    let mut buffer = shared.buffer.lock();
    let pending: Vec<BinanceDepthEvent> = buffer
        .iter()
        .filter(|ev| ev.final_update_id > watermark)
        .cloned()
        .collect();

    let bridge = pending
        .iter()
        .position(|ev| ev.first_update_id <= watermark + 1 && watermark + 1 <= ev.final_update_id);

    let Some(start) = bridge else {
        return Err(FeedError::BridgeNotFound {
            watermark,
            buffered: buffer.len(),
        });
    };

    let mut book = shared.book.write();
    let mut applied = 0usize;
    for event in &pending[start..] {
        match book.apply_update(
            &event.bids,
            &event.asks,
            event.first_update_id,
            event.final_update_id,
        ) {
            UpdateOutcome::Applied => applied += 1,
            UpdateOutcome::Stale => {}
            UpdateOutcome::Backwards | UpdateOutcome::BridgeMismatch => {
                // A fresh cycle starts from a fresh buffer
                let replay_watermark = book.last_sequence_id();
                drop(book);
                buffer.clear();
                return Err(FeedError::BufferReplay {
                    first_id: event.first_update_id,
                    final_id: event.final_update_id,
                    watermark: replay_watermark,
                });
            }
        }
    }
    drop(book);

    buffer.clear();
    *shared.sync.write() = SyncState::Synchronized;
    Ok(applied)
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
                let event: BinanceDepthEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(err) => {
                        debug!(exchange = EXCHANGE, error = %err, "dropping unparseable frame");
                        continue;
                    }
                };
                let count = shared.counters.messages.fetch_add(1, Ordering::Relaxed) + 1;
                route_event(&shared, event, count);
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

/// Buffer the event or apply it live, depending on the sync state
///
/// The state check happens under the buffer lock. `replay_buffer` flips the
/// state while holding that lock, so an event routed here either joins the
/// buffer before the drain or goes straight to the book after it.
fn route_event(shared: &Shared, event: BinanceDepthEvent, count: u64) {
    {
        let mut buffer = shared.buffer.lock();
        if *shared.sync.read() != SyncState::Synchronized {
            if buffer.len() >= shared.config.buffer_capacity {
                buffer.pop_front();
            }
            buffer.push_back(event);
            return;
        }
    }
    apply_live(shared, event, count);
}

fn apply_live(shared: &Shared, event: BinanceDepthEvent, count: u64) {
    if let Some(event_time) = event.event_time_ms {
        shared.latency.lock().record(event_time as f64);
    }

    let outcome = shared.book.write().apply_update(
        &event.bids,
        &event.asks,
        event.first_update_id,
        event.final_update_id,
    );

    match outcome {
        UpdateOutcome::Applied => {
            let interval = shared.config.checksum_interval;
            if interval > 0 && count % interval == 0 {
                let book = shared.book.read();
                debug!(
                    exchange = EXCHANGE,
                    watermark = book.last_sequence_id(),
                    checksum = book.default_checksum(),
                    "periodic book checksum"
                );
            }
        }
        UpdateOutcome::Stale => {
            trace!(
                exchange = EXCHANGE,
                final_id = event.final_update_id,
                "skipping stale delta"
            );
        }
        UpdateOutcome::Backwards | UpdateOutcome::BridgeMismatch => {
            warn!(
                exchange = EXCHANGE,
                first_id = event.first_update_id,
                final_id = event.final_update_id,
                "sequencing violation, scheduling resynchronization"
            );
            *shared.sync.write() = SyncState::Unsynchronized;
            shared.buffer.lock().clear();
        }
    }
}

#[async_trait]
impl FeedSynchronizer for BinanceFeed {
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
            buffered_events: self.shared.buffer.lock().len(),
            book: self.shared.book.read().stats(),
            latency: self.shared.latency.lock().summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MockSnapshotSource;
    use crate::transport::{MockConnector, MockTransport};
    use rust_decimal_macros::dec;

    fn test_config() -> BinanceConfig {
        BinanceConfig::new("BTCUSDT")
            .with_min_buffered_events(2)
            .with_timings(
                Duration::from_millis(200),
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_millis(10),
            )
            .with_reconnect(
                ReconnectPolicy::default().with_initial_delay(Duration::from_millis(10)),
            )
    }

    fn depth_frame(first: u64, last: u64, bid: (&str, &str), ask: (&str, &str)) -> String {
        format!(
            r#"{{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":{first},"u":{last},"b":[["{}","{}"]],"a":[["{}","{}"]]}}"#,
            bid.0, bid.1, ask.0, ask.1
        )
    }

    fn snapshot_json(last_update_id: u64) -> liquidity_types::DepthSnapshot {
        serde_json::from_str(&format!(
            r#"{{"lastUpdateId":{last_update_id},"bids":[["50000.00","1.5"],["49999.00","2.0"]],"asks":[["50001.00","1.0"],["50002.00","3.0"]]}}"#
        ))
        .unwrap()
    }

    fn make_event(first: u64, last: u64) -> BinanceDepthEvent {
        serde_json::from_str(&depth_frame(
            first,
            last,
            ("50000.00", "1.5"),
            ("50001.00", "1.0"),
        ))
        .unwrap()
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

    #[tokio::test]
    async fn test_full_synchronization_flow() {
        let connector = Arc::new(MockConnector::new());
        let mut session = MockTransport::new().hold_open();
        // Buffered before the snapshot (watermark 100): stale, bridge, follow-up
        session.push_text(depth_frame(95, 98, ("49990.00", "1.0"), ("50010.00", "1.0")));
        session.push_text(depth_frame(99, 103, ("50000.00", "2.5"), ("50001.00", "1.0")));
        session.push_text(depth_frame(104, 110, ("49998.00", "4.0"), ("50002.00", "2.0")));
        connector.push_session(session);

        let snapshots = Arc::new(MockSnapshotSource::new());
        snapshots.push(snapshot_json(100));

        let feed = Arc::new(BinanceFeed::with_sources(
            test_config(),
            connector,
            snapshots,
        ));
        let runner = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.run().await })
        };

        assert!(
            wait_for(|| feed.is_synchronized(), Duration::from_secs(5)).await,
            "feed never synchronized"
        );

        let book = feed.book();
        {
            let book = book.read();
            // Snapshot levels overwritten by the bridge and follow-up
            assert_eq!(book.best_bid(), Some((dec!(50000.00), dec!(2.5))));
            assert_eq!(book.last_sequence_id(), 110);
            assert!(!book.is_awaiting_bridge());
            assert!(!book.is_crossed());
        }

        feed.stop();
        runner.await.unwrap().unwrap();

        let status = feed.status();
        assert_eq!(status.exchange, "binance");
        assert!(status.counters.message_count >= 3);
    }

    #[tokio::test]
    async fn test_bridge_missing_preserves_buffer() {
        let feed = BinanceFeed::with_sources(
            test_config(),
            Arc::new(MockConnector::new()),
            Arc::new(MockSnapshotSource::new()),
        );

        // Every buffered event starts past watermark+1: no bridge
        {
            let mut buffer = feed.shared.buffer.lock();
            buffer.push_back(make_event(150, 155));
            buffer.push_back(make_event(156, 160));
        }

        let err = replay_buffer(&feed.shared, 100).unwrap_err();
        assert!(matches!(
            err,
            FeedError::BridgeNotFound {
                watermark: 100,
                buffered: 2
            }
        ));
        // Buffer kept for the next attempt against a newer snapshot
        assert_eq!(feed.shared.buffer.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_replay_applies_from_bridge() {
        let feed = BinanceFeed::with_sources(
            test_config(),
            Arc::new(MockConnector::new()),
            Arc::new(MockSnapshotSource::new()),
        );
        feed.shared.book.write().apply_snapshot(&[], &[], 100);
        {
            let mut buffer = feed.shared.buffer.lock();
            buffer.push_back(make_event(90, 95)); // stale, filtered
            buffer.push_back(make_event(99, 104)); // bridge
            buffer.push_back(make_event(105, 112));
        }

        let applied = replay_buffer(&feed.shared, 100).unwrap();
        assert_eq!(applied, 2);
        assert!(feed.shared.buffer.lock().is_empty());
        assert_eq!(feed.shared.book.read().last_sequence_id(), 112);
    }

    #[tokio::test]
    async fn test_events_buffered_during_handoff_are_applied() {
        let feed = BinanceFeed::with_sources(
            test_config(),
            Arc::new(MockConnector::new()),
            Arc::new(MockSnapshotSource::new()),
        );
        feed.shared.book.write().apply_snapshot(&[], &[], 100);
        *feed.shared.sync.write() = SyncState::Synchronizing;
        {
            let mut buffer = feed.shared.buffer.lock();
            buffer.push_back(make_event(99, 104)); // bridge
            buffer.push_back(make_event(105, 110));
        }
        // Lands while the snapshot wait is still running: routed to the buffer
        let late: BinanceDepthEvent = serde_json::from_str(&depth_frame(
            111,
            115,
            ("49995.00", "7.0"),
            ("50005.00", "2.0"),
        ))
        .unwrap();
        route_event(&feed.shared, late, 1);
        assert_eq!(feed.shared.buffer.lock().len(), 3);

        let applied = replay_buffer(&feed.shared, 100).unwrap();
        assert_eq!(applied, 3);
        // The state flip and the drain are one atomic step under the buffer
        // lock, so the late event made it onto the book instead of being
        // stranded in a buffer nobody drains again.
        assert_eq!(*feed.shared.sync.read(), SyncState::Synchronized);
        assert!(feed.shared.buffer.lock().is_empty());
        {
            let book = feed.shared.book.read();
            assert_eq!(book.last_sequence_id(), 115);
            let view = book.depth(10);
            assert!(view
                .bids
                .iter()
                .any(|l| l.price == dec!(49995.00) && l.qty == dec!(7.0)));
        }

        // Follow-up frames now go straight to the book
        route_event(&feed.shared, make_event(116, 120), 2);
        assert!(feed.shared.buffer.lock().is_empty());
        assert_eq!(feed.shared.book.read().last_sequence_id(), 120);
    }

    #[tokio::test]
    async fn test_sync_cycle_gives_up_after_max_attempts() {
        let snapshots = Arc::new(MockSnapshotSource::new());
        // Every fetch fails; the cycle burns its attempts
        let feed = BinanceFeed::with_sources(
            test_config().with_max_sync_attempts(2),
            Arc::new(MockConnector::new()),
            snapshots,
        );

        let idle_listener = tokio::spawn(futures_util::future::pending::<()>());
        let err = feed.synchronize(&idle_listener).await.unwrap_err();
        idle_listener.abort();

        assert!(matches!(err, FeedError::SyncFailed { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_live_violation_triggers_resync_state() {
        let feed = BinanceFeed::with_sources(
            test_config(),
            Arc::new(MockConnector::new()),
            Arc::new(MockSnapshotSource::new()),
        );
        feed.shared.book.write().apply_snapshot(&[], &[], 100);
        // Bridge so the book is live
        feed.shared.book.write().apply_update(&[], &[], 99, 110);
        *feed.shared.sync.write() = SyncState::Synchronized;
        feed.shared.buffer.lock().push_back(make_event(200, 205));

        // Reaches backwards past the watermark
        apply_live(&feed.shared, make_event(105, 120), 1);

        assert_eq!(*feed.shared.sync.read(), SyncState::Unsynchronized);
        assert!(feed.shared.buffer.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconnects_after_session_drop() {
        let connector = Arc::new(MockConnector::new());
        // First session dies immediately; second synchronizes
        let mut dead = MockTransport::new();
        dead.push_close();
        connector.push_session(dead);

        let mut live = MockTransport::new().hold_open();
        live.push_text(depth_frame(99, 103, ("50000.00", "2.5"), ("50001.00", "1.0")));
        live.push_text(depth_frame(104, 110, ("49998.00", "4.0"), ("50002.00", "2.0")));
        connector.push_session(live);

        let snapshots = Arc::new(MockSnapshotSource::new());
        snapshots.push(snapshot_json(100));
        snapshots.push(snapshot_json(100));

        let feed = Arc::new(BinanceFeed::with_sources(
            test_config(),
            connector.clone(),
            snapshots,
        ));
        let runner = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.run().await })
        };

        assert!(
            wait_for(|| feed.is_synchronized(), Duration::from_secs(5)).await,
            "feed never recovered"
        );
        assert_eq!(connector.remaining_sessions(), 0);
        assert!(feed.status().counters.reconnect_count >= 1);

        feed.stop();
        runner.await.unwrap().unwrap();
    }
}
