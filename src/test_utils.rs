//! In-memory doubles for the transport and collaborators.
//!
//! `MockTransport` follows the same state rules as the WebSocket transport
//! but lets a test drive the server side by hand (or answer the handshake
//! automatically).

#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::location::{Availability, PositionSource};
use crate::stomp::Frame;
use crate::transport::{
    ABNORMAL_CLOSURE, ConnectRequest, ConnectionState, Connector, NORMAL_CLOSURE, Transport,
    TransportEvent,
};
use crate::types::{EncounterId, RawFix, Role};
use crate::{Accuracy, RelayError, Result, RoleResolver, TokenProvider};

/// CONNECTED reply used by the auto handshake.
pub const CONNECTED_REPLY: &str = "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0";

pub struct MockTransport {
    state: Mutex<ConnectionState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    sent: Mutex<Vec<String>>,
    requests: Mutex<Vec<ConnectRequest>>,
    dropped: AtomicUsize,
    connect_calls: AtomicUsize,
    auto_handshake: bool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Opens on connect and answers CONNECT with CONNECTED.
    pub fn with_auto_handshake() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(auto_handshake: bool) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            sent: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            dropped: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            auto_handshake,
        }
    }

    /// Server side: the socket opened.
    pub fn open(&self) {
        *self.state.lock().unwrap() = ConnectionState::Open;
        let _ = self.events_tx.send(TransportEvent::Opened);
    }

    /// Server side: deliver a raw text message.
    pub fn receive(&self, raw: &str) {
        let _ = self.events_tx.send(TransportEvent::FrameReceived(raw.to_string()));
    }

    /// Server side: socket failure.
    pub fn fail(&self, cause: &str) {
        let _ = self.events_tx.send(TransportEvent::TransportError(cause.to_string()));
        self.server_close(ABNORMAL_CLOSURE, cause);
    }

    /// Server side: close frame.
    pub fn server_close(&self, code: u16, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if state.is_closed() {
            return;
        }
        *state = ConnectionState::Closed(reason.to_string());
        let _ = self.events_tx.send(TransportEvent::Closed { code, reason: reason.to_string() });
    }

    /// Frames that reached an open socket, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent().iter().map(|raw| Frame::decode(raw).unwrap()).collect()
    }

    /// Frames dropped because the socket was not open.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_sent(&self, count: usize) {
        wait_until(|| self.sent.lock().unwrap().len() >= count).await;
    }
}

impl Transport for MockTransport {
    fn connect(&self, request: ConnectRequest) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state != ConnectionState::Disconnected {
            return;
        }
        self.requests.lock().unwrap().push(request);
        *state = ConnectionState::Connecting;
        drop(state);
        if self.auto_handshake {
            self.open();
        }
    }

    fn send(&self, raw: String) {
        if !self.state.lock().unwrap().is_open() {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        let is_connect = raw.starts_with("CONNECT\n");
        self.sent.lock().unwrap().push(raw);
        if is_connect && self.auto_handshake {
            self.receive(CONNECTED_REPLY);
        }
    }

    fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        if state.is_closed() {
            return;
        }
        *state = ConnectionState::Closed("client disconnect".to_string());
        let _ = self
            .events_tx
            .send(TransportEvent::Closed { code: NORMAL_CLOSURE, reason: "client disconnect".into() });
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().clone()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}

/// Hands out mock transports and remembers each one.
pub struct MockConnector {
    auto_handshake: bool,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { auto_handshake: false, created: Mutex::new(Vec::new()) })
    }

    pub fn with_auto_handshake() -> Arc<Self> {
        Arc::new(Self { auto_handshake: true, created: Mutex::new(Vec::new()) })
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created.lock().unwrap().last().cloned().expect("no transport created yet")
    }

    pub async fn wait_for_transport(&self, count: usize) -> Arc<MockTransport> {
        wait_until(|| self.created_count() >= count).await;
        self.created.lock().unwrap()[count - 1].clone()
    }
}

impl Connector for MockConnector {
    fn create(&self) -> Arc<dyn Transport> {
        let transport =
            if self.auto_handshake { MockTransport::with_auto_handshake() } else { MockTransport::new() };
        self.created.lock().unwrap().push(Arc::clone(&transport));
        transport
    }
}

/// Fixed token, or a failure.
pub struct TestTokens(pub Option<&'static str>);

#[async_trait]
impl TokenProvider for TestTokens {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(self.0.map(str::to_string))
    }
}

/// Resolver that always fails.
pub struct FailingRoles;

#[async_trait]
impl RoleResolver for FailingRoles {
    async fn role_for(&self, encounter: &EncounterId) -> Result<Role> {
        Err(RelayError::collaborator("role resolver", format!("encounter {encounter} not found")))
    }
}

/// Positioning service that is switched off.
pub struct DeniedSource;

#[async_trait]
impl PositionSource for DeniedSource {
    fn availability(&self) -> Availability {
        Availability::PermissionDenied
    }

    async fn next_fix(&self, _accuracy: Accuracy) -> Result<Option<RawFix>> {
        Err(RelayError::permission_denied("location"))
    }
}

/// Grants access up front, then reports it revoked on the first read.
pub struct RevokingSource;

#[async_trait]
impl PositionSource for RevokingSource {
    fn availability(&self) -> Availability {
        Availability::Available
    }

    async fn next_fix(&self, _accuracy: Accuracy) -> Result<Option<RawFix>> {
        Err(RelayError::permission_denied("location"))
    }
}

/// Resolver that never answers.
pub struct PendingRoles;

#[async_trait]
impl RoleResolver for PendingRoles {
    async fn role_for(&self, _encounter: &EncounterId) -> Result<Role> {
        std::future::pending().await
    }
}

/// Poll `condition` every few milliseconds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 2s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
