//! Feed error taxonomy
//!
//! Three classes of failure, handled differently:
//! - transport/session errors escape the session and are retried with backoff
//! - per-message parse errors drop the message; the connection lives on
//! - sequencing violations invalidate the book and force a resynchronization

use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by feed synchronizers
#[derive(Error, Debug)]
pub enum FeedError {
    /// Underlying transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// REST snapshot request failed
    #[error("snapshot fetch failed: {0}")]
    SnapshotFetch(String),

    /// Pushed snapshot never arrived
    #[error("timed out waiting for snapshot after {0:?}")]
    SnapshotTimeout(Duration),

    /// No buffered event spans the snapshot watermark
    #[error("no bridge event found: watermark {watermark}, {buffered} buffered events")]
    BridgeNotFound { watermark: u64, buffered: usize },

    /// A buffered event failed the sequencing check during replay
    #[error("buffered event [{first_id}, {final_id}] rejected at watermark {watermark}")]
    BufferReplay {
        first_id: u64,
        final_id: u64,
        watermark: u64,
    },

    /// Every synchronization attempt in a cycle failed
    #[error("synchronization failed after {attempts} attempts")]
    SyncFailed { attempts: u32 },

    /// The book can no longer be trusted and must be rebuilt
    #[error("order book desynchronized: {reason}")]
    Desynchronized { reason: String },

    /// The socket listener task ended while the feed still needed it
    #[error("listener task stopped unexpectedly")]
    ListenerStopped,

    /// Reconnect budget exhausted
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Convenience result alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

impl FeedError {
    /// Whether the owning run loop should reconnect and try again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FeedError::ReconnectExhausted { .. })
    }

    /// Whether this error invalidates the current book state
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            FeedError::Desynchronized { .. }
                | FeedError::BridgeNotFound { .. }
                | FeedError::BufferReplay { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedError::BridgeNotFound {
            watermark: 100,
            buffered: 7,
        };
        assert_eq!(
            err.to_string(),
            "no bridge event found: watermark 100, 7 buffered events"
        );
    }

    #[test]
    fn test_taxonomy_predicates() {
        assert!(FeedError::SnapshotFetch("503".into()).is_retryable());
        assert!(!FeedError::ReconnectExhausted { attempts: 5 }.is_retryable());

        assert!(FeedError::Desynchronized {
            reason: "crossed book".into()
        }
        .requires_resync());
        assert!(!FeedError::ListenerStopped.requires_resync());
    }

    #[test]
    fn test_transport_error_converts() {
        let err: FeedError = TransportError::ConnectionClosed.into();
        assert!(matches!(err, FeedError::Transport(_)));
    }
}
