//! REST depth snapshot source
//!
//! The buffer-then-bridge synchronizer needs a point-in-time snapshot with a
//! sequence watermark; this trait is that request/response channel, with a
//! reqwest implementation for live use and a scripted mock for tests.

use crate::error::{FeedError, FeedResult};
use async_trait::async_trait;
use liquidity_types::DepthSnapshot;
use std::time::Duration;
use tracing::debug;

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A source of depth snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch a fresh snapshot
    async fn fetch(&self) -> FeedResult<DepthSnapshot>;
}

/// REST snapshot client (Binance `/fapi/v1/depth` shape)
pub struct RestSnapshotSource {
    client: reqwest::Client,
    url: String,
}

impl RestSnapshotSource {
    /// Build a client for `{base_url}/fapi/v1/depth?symbol=..&limit=..`
    pub fn new(base_url: &str, symbol: &str, limit: u32) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| FeedError::SnapshotFetch(e.to_string()))?;

        Ok(Self {
            client,
            url: format!(
                "{}/fapi/v1/depth?symbol={}&limit={}",
                base_url.trim_end_matches('/'),
                symbol.to_uppercase(),
                limit
            ),
        })
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch(&self) -> FeedResult<DepthSnapshot> {
        debug!(url = %self.url, "fetching depth snapshot");

        let snapshot = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::SnapshotFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| FeedError::SnapshotFetch(e.to_string()))?
            .json::<DepthSnapshot>()
            .await
            .map_err(|e| FeedError::SnapshotFetch(e.to_string()))?;

        debug!(
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "snapshot received"
        );
        Ok(snapshot)
    }
}

/// Scripted snapshot source for tests
#[cfg(any(test, feature = "test-utils"))]
pub struct MockSnapshotSource {
    responses: parking_lot::Mutex<std::collections::VecDeque<FeedResult<DepthSnapshot>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockSnapshotSource {
    pub fn new() -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Queue a successful snapshot
    pub fn push(&self, snapshot: DepthSnapshot) {
        self.responses.lock().push_back(Ok(snapshot));
    }

    /// Queue a fetch failure
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.responses
            .lock()
            .push_back(Err(FeedError::SnapshotFetch(reason.into())));
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockSnapshotSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SnapshotSource for MockSnapshotSource {
    async fn fetch(&self) -> FeedResult<DepthSnapshot> {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(FeedError::SnapshotFetch("no scripted snapshot".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DepthSnapshot {
        serde_json::from_str(
            r#"{"lastUpdateId":42,"bids":[["100.0","1.0"]],"asks":[["101.0","2.0"]]}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_mock_snapshot_order() {
        let source = MockSnapshotSource::new();
        source.push_failure("503");
        source.push(sample());

        assert!(source.fetch().await.is_err());
        let snapshot = source.fetch().await.unwrap();
        assert_eq!(snapshot.last_update_id, 42);
    }

    #[tokio::test]
    async fn test_mock_snapshot_exhausted() {
        let source = MockSnapshotSource::new();
        assert!(matches!(
            source.fetch().await,
            Err(FeedError::SnapshotFetch(_))
        ));
    }

    #[test]
    fn test_rest_url_shape() {
        let source = RestSnapshotSource::new("https://fapi.binance.com/", "btcusdt", 1000).unwrap();
        assert_eq!(
            source.url,
            "https://fapi.binance.com/fapi/v1/depth?symbol=BTCUSDT&limit=1000"
        );
    }
}
