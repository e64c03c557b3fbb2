//! WebSocket transport abstraction
//!
//! A [`Connector`] produces connected [`Transport`]s; the listener task that
//! reads a feed owns its transport outright, so reconnecting is just asking
//! the connector for a fresh one. Mock implementations script whole sessions,
//! which makes reconnect and resynchronization logic unit-testable without a
//! network.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A connected, text-oriented duplex stream
#[async_trait]
pub trait Transport: Send {
    /// Send a text message
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive a text message
    ///
    /// Returns `None` if the connection was closed gracefully. Pings are
    /// answered internally and never surface.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<(), TransportError>;

    /// The endpoint this transport is connected to
    fn endpoint(&self) -> &str;
}

/// Produces connected transports; one call per session
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// The endpoint URL this connector dials
    fn endpoint(&self) -> &str;
}

/// Real WebSocket connector using tokio-tungstenite
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector for a WebSocket URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        debug!(url = %self.url, "connecting to WebSocket");

        let (stream, _response) = timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(url = %self.url, "WebSocket connected");
        Ok(Box::new(WsTransport {
            url: self.url.clone(),
            stream,
        }))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Live WebSocket stream
pub struct WsTransport {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// One scripted item in a mock session
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub enum ScriptItem {
    /// A frame returned from recv()
    Text(String),
    /// Graceful close (recv returns None)
    Close,
    /// Receive error
    Error(TransportError),
    /// Delay before the next item
    Wait(Duration),
}

/// Mock transport replaying a scripted session
///
/// With `hold_open` set, an exhausted script parks recv() forever instead of
/// erroring, simulating a quiet connection that stays up.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockTransport {
    url: String,
    script: std::collections::VecDeque<ScriptItem>,
    hold_open: bool,
    fail_send: bool,
    sent: std::sync::Arc<parking_lot::Mutex<Vec<String>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockTransport {
    /// Create a transport with an empty script
    pub fn new() -> Self {
        Self {
            url: "wss://mock.test".to_string(),
            script: std::collections::VecDeque::new(),
            hold_open: false,
            fail_send: false,
            sent: std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Queue a text frame
    pub fn push_text(&mut self, msg: impl Into<String>) {
        self.script.push_back(ScriptItem::Text(msg.into()));
    }

    /// Queue a graceful close
    pub fn push_close(&mut self) {
        self.script.push_back(ScriptItem::Close);
    }

    /// Queue a receive error
    pub fn push_error(&mut self, error: TransportError) {
        self.script.push_back(ScriptItem::Error(error));
    }

    /// Queue a delay before the next item
    pub fn push_wait(&mut self, delay: Duration) {
        self.script.push_back(ScriptItem::Wait(delay));
    }

    /// Park recv() once the script runs out instead of erroring
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Make every send() fail
    pub fn fail_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    /// Handle to the frames this transport has sent
    pub fn sent_handle(&self) -> std::sync::Arc<parking_lot::Mutex<Vec<String>>> {
        self.sent.clone()
    }

    pub(crate) fn share_sent(&mut self, sent: std::sync::Arc<parking_lot::Mutex<Vec<String>>>) {
        self.sent = sent;
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }
        self.sent.lock().push(message.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.script.pop_front() {
                Some(ScriptItem::Text(text)) => return Ok(Some(text)),
                Some(ScriptItem::Close) => return Ok(None),
                Some(ScriptItem::Error(err)) => return Err(err),
                Some(ScriptItem::Wait(delay)) => tokio::time::sleep(delay).await,
                None => {
                    if self.hold_open {
                        futures_util::future::pending::<()>().await;
                    }
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Mock connector handing out scripted sessions in order
///
/// Frames sent on any session land in one shared log, inspectable after the
/// sessions themselves have been consumed by the feed.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockConnector {
    url: String,
    sessions: parking_lot::Mutex<std::collections::VecDeque<MockTransport>>,
    sent: std::sync::Arc<parking_lot::Mutex<Vec<String>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockConnector {
    pub fn new() -> Self {
        Self {
            url: "wss://mock.test".to_string(),
            sessions: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            sent: std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Queue the next session's transport
    pub fn push_session(&self, mut transport: MockTransport) {
        transport.share_sent(self.sent.clone());
        self.sessions.lock().push_back(transport);
    }

    /// All frames sent across every session so far
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sessions not yet handed out
    pub fn remaining_sessions(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        match self.sessions.lock().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(TransportError::ConnectionFailed(
                "no scripted session left".into(),
            )),
        }
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
