//! Transport connection abstraction.
//!
//! A [`Transport`] owns one socket for one connection attempt. Its state moves
//! forward only (`Disconnected → Connecting → Open → Closed`); reconnecting
//! means asking a [`Connector`] for a fresh instance.
//!
//! Every operation is fire-and-forget: outcomes are reported on the event
//! receiver returned by [`Transport::take_events`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

pub mod websocket;

pub use websocket::{WebSocketConnector, WebSocketTransport};

/// Close code sent on a normal client-initiated disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the socket ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection state of one transport instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed(String),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

/// Events emitted by a transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    FrameReceived(String),
    TransportError(String),
    Closed { code: u16, reason: String },
}

/// Everything needed to open the socket.
///
/// A bearer token is carried twice for backend compatibility: as an
/// `Authorization` header on the upgrade request and as an `access_token`
/// query parameter.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    endpoint: Url,
    bearer_token: Option<String>,
    headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint, bearer_token: None, headers: Vec::new() }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Add an extra upgrade request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// URL to dial, with `access_token` appended when a token is present.
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(token) = &self.bearer_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        url
    }

    /// Upgrade request headers, `Authorization` first when a token is present.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if let Some(token) = &self.bearer_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers.extend(self.headers.iter().cloned());
        headers
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("endpoint", &self.endpoint.as_str())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.len())
            .finish()
    }
}

/// One socket, one connection attempt.
pub trait Transport: Send + Sync + 'static {
    /// Start opening the socket. No-op unless the state is `Disconnected`.
    fn connect(&self, request: ConnectRequest);

    /// Queue a raw frame. Silently dropped unless the state is `Open`.
    fn send(&self, raw: String);

    /// Close with a normal closure code. Idempotent.
    fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    /// Take the event receiver. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// Creates fresh transports, one per connection attempt.
pub trait Connector: Send + Sync + 'static {
    fn create(&self) -> Arc<dyn Transport>;
}
