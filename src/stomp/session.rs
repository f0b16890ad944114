//! STOMP session over a [`Transport`].
//!
//! The session sends CONNECT as soon as the socket opens and never blocks
//! callers on the server's CONNECTED reply: frames sent earlier are
//! best-effort and may be dropped if the socket is not open yet.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::frame::{Command, Frame, HeartBeat};
use crate::transport::{ConnectRequest, Transport, TransportEvent};
use crate::{RelayError, Result};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// Typed events re-emitted from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Server replied CONNECTED.
    Connected,
    /// Inbound MESSAGE frame.
    Message { destination: String, body: String },
    TransportError(String),
    /// CONNECTED did not arrive within the configured timeout.
    HandshakeTimeout(Duration),
    Closed { code: u16, reason: String },
}

/// A subscription registered on this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
}

impl Subscription {
    /// Subscription ids are derived from the destination.
    pub fn for_destination(destination: impl Into<String>) -> Self {
        let destination = destination.into();
        Self { id: format!("sub-{destination}"), destination }
    }
}

/// Handshake settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub heart_beat: HeartBeat,
    /// How long to wait for CONNECTED once the socket is open. `None` waits
    /// indefinitely.
    pub handshake_timeout: Option<Duration>,
}

/// One STOMP session bound to one transport instance.
pub struct StompSession {
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionState>>,
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
    cancel: CancellationToken,
}

impl StompSession {
    /// Open a session: take the transport's events, dial, and start the pump.
    ///
    /// Returns the session and its event receiver. Fails only if the
    /// transport's events were already taken by someone else.
    pub fn open(
        transport: Arc<dyn Transport>,
        request: ConnectRequest,
        options: SessionOptions,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let transport_events = transport
            .take_events()
            .ok_or_else(|| RelayError::transport_failed("transport events already taken"))?;

        let (state, _) = watch::channel(SessionState::Idle);
        let state = Arc::new(state);
        state.send_replace(SessionState::Connecting);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pump = Pump {
            transport: Arc::clone(&transport),
            state: Arc::clone(&state),
            events: events_tx,
            options,
        };
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            pump.run(transport_events, pump_cancel).await;
        });

        transport.connect(request);

        Ok((Self { transport, state, subscriptions: Mutex::new(BTreeMap::new()), cancel }, events_rx))
    }

    /// Subscribe to a destination.
    ///
    /// A destination already subscribed on this session is not subscribed
    /// again; the existing subscription is returned.
    pub fn subscribe(&self, destination: &str) -> Subscription {
        let subscription = Subscription::for_destination(destination);
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = subscriptions.get(&subscription.id) {
            debug!(id = %existing.id, "already subscribed");
            return existing.clone();
        }

        debug!(id = %subscription.id, destination, "SUBSCRIBE");
        self.transport
            .send(Frame::subscribe(&subscription.id, &subscription.destination).encode());
        subscriptions.insert(subscription.id.clone(), subscription.clone());
        subscription
    }

    /// SEND a JSON body. Not retried.
    pub fn send(&self, destination: &str, body: &str) {
        trace!(destination, len = body.len(), "SEND");
        self.transport.send(Frame::send(destination, body).encode());
    }

    /// Tear down the session and its transport. Idempotent.
    pub fn disconnect(&self) {
        if self.state.send_replace(SessionState::Closed) != SessionState::Closed {
            debug!("STOMP session disconnecting");
        }
        self.transport.disconnect();
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.cancel.cancel();
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }
}

impl Drop for StompSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Moves transport events into session events.
struct Pump {
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    options: SessionOptions,
}

impl Pump {
    async fn run(
        self,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        // armed when the socket opens
        let handshake = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(handshake);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("STOMP pump cancelled");
                    break;
                }
                () = &mut handshake, if awaiting_ack => {
                    awaiting_ack = false;
                    if *self.state.borrow() == SessionState::Connecting {
                        let duration = self.options.handshake_timeout.unwrap_or_default();
                        warn!(?duration, "No CONNECTED reply from server");
                        self.emit(SessionEvent::HandshakeTimeout(duration));
                    }
                }
                event = transport_events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        TransportEvent::Opened => {
                            debug!("Socket open, sending CONNECT");
                            self.transport.send(Frame::connect(self.options.heart_beat).encode());
                            if let Some(timeout) = self.options.handshake_timeout {
                                handshake.as_mut().reset(Instant::now() + timeout);
                                awaiting_ack = true;
                            }
                        }
                        TransportEvent::FrameReceived(raw) => {
                            if self.handle_raw(&raw) {
                                awaiting_ack = false;
                            }
                        }
                        TransportEvent::TransportError(cause) => {
                            self.emit(SessionEvent::TransportError(cause));
                        }
                        TransportEvent::Closed { code, reason } => {
                            self.state.send_replace(SessionState::Closed);
                            self.emit(SessionEvent::Closed { code, reason });
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Handle one WebSocket message, which may hold several NUL-separated
    /// frames. Returns true if CONNECTED was among them.
    fn handle_raw(&self, raw: &str) -> bool {
        let mut acknowledged = false;
        for chunk in raw.split('\0') {
            if chunk.trim_matches(['\r', '\n']).is_empty() {
                trace!("heart-beat");
                continue;
            }
            let frame = match Frame::decode(chunk) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping malformed frame: {}", e);
                    continue;
                }
            };
            acknowledged |= self.handle_frame(frame);
        }
        acknowledged
    }

    fn handle_frame(&self, frame: Frame) -> bool {
        match frame.command() {
            Command::Connected => {
                info!(version = frame.get_header("version").unwrap_or("?"), "STOMP session connected");
                self.state.send_replace(SessionState::Connected);
                self.emit(SessionEvent::Connected);
                true
            }
            Command::Message => {
                match frame.get_header("destination") {
                    Some(destination) => {
                        let destination = destination.to_string();
                        self.emit(SessionEvent::Message { destination, body: frame.into_body() });
                    }
                    None => warn!("MESSAGE without destination, dropping"),
                }
                false
            }
            Command::Error => {
                warn!(error_message = frame.get_header("message").unwrap_or(""), "STOMP ERROR frame ignored");
                false
            }
            other => {
                debug!(command = %other, "Ignoring inbound frame");
                false
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("session event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;
    use url::Url;

    fn request() -> ConnectRequest {
        ConnectRequest::new(Url::parse("ws://relay.test/ws").unwrap())
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed")
    }

    fn open(transport: &Arc<MockTransport>, options: SessionOptions) -> (StompSession, mpsc::UnboundedReceiver<SessionEvent>) {
        StompSession::open(transport.clone(), request(), options, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn sends_connect_when_socket_opens() {
        let transport = MockTransport::new();
        let (session, _events) = open(&transport, SessionOptions::default());
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(transport.connect_calls(), 1);

        transport.open();
        transport.wait_for_sent(1).await;
        assert_eq!(transport.sent()[0], "CONNECT\naccept-version:1.2\nheart-beat:10000,10000\n\n\0");
    }

    #[tokio::test]
    async fn connected_reply_moves_state() {
        let transport = MockTransport::new();
        let (session, mut events) = open(&transport, SessionOptions::default());
        transport.open();
        transport.receive("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0");

        assert_eq!(next(&mut events).await, SessionEvent::Connected);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn only_messages_are_re_emitted() {
        let transport = MockTransport::new();
        let (_session, mut events) = open(&transport, SessionOptions::default());
        transport.open();
        transport.receive("\n");
        transport.receive("ERROR\nmessage:nope\n\n\0");
        transport.receive("garbage without command");
        transport.receive("RECEIPT\nreceipt-id:1\n\n\0");
        transport.receive("MESSAGE\ndestination:/topic/encounter/E1\n\n{\"lat\":1.0,\"lng\":2.0}\0");

        assert_eq!(
            next(&mut events).await,
            SessionEvent::Message {
                destination: "/topic/encounter/E1".into(),
                body: r#"{"lat":1.0,"lng":2.0}"#.into(),
            }
        );
    }

    #[tokio::test]
    async fn several_frames_in_one_message() {
        let transport = MockTransport::new();
        let (_session, mut events) = open(&transport, SessionOptions::default());
        transport.open();
        transport.receive("CONNECTED\nversion:1.2\n\n\0\nMESSAGE\ndestination:/t\n\nhi\0");

        assert_eq!(next(&mut events).await, SessionEvent::Connected);
        assert_eq!(
            next(&mut events).await,
            SessionEvent::Message { destination: "/t".into(), body: "hi".into() }
        );
    }

    #[tokio::test]
    async fn duplicate_subscribe_sends_one_frame() {
        let transport = MockTransport::new();
        let (session, _events) = open(&transport, SessionOptions::default());
        transport.open();
        transport.wait_for_sent(1).await;

        let first = session.subscribe("/topic/encounter/E1");
        let second = session.subscribe("/topic/encounter/E1");

        assert_eq!(first, second);
        assert_eq!(first.id, "sub-/topic/encounter/E1");
        let subscribes: Vec<_> = transport.sent().into_iter().filter(|f| f.starts_with("SUBSCRIBE")).collect();
        assert_eq!(subscribes, vec!["SUBSCRIBE\nid:sub-/topic/encounter/E1\ndestination:/topic/encounter/E1\n\n\0"]);
        assert_eq!(session.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn send_before_open_is_best_effort() {
        let transport = MockTransport::new();
        let (session, _events) = open(&transport, SessionOptions::default());
        session.send("/app/encounter/E1/pos", "{}");
        assert!(transport.sent().is_empty());
        assert_eq!(transport.dropped(), 1);
    }

    #[tokio::test]
    async fn transport_close_is_reported() {
        let transport = MockTransport::new();
        let (session, mut events) = open(&transport, SessionOptions::default());
        transport.open();
        transport.fail("connection reset");

        assert_eq!(next(&mut events).await, SessionEvent::TransportError("connection reset".into()));
        assert!(matches!(next(&mut events).await, SessionEvent::Closed { code: 1006, .. }));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn handshake_timeout_fires_once() {
        let transport = MockTransport::new();
        let options = SessionOptions {
            handshake_timeout: Some(Duration::from_millis(20)),
            ..SessionOptions::default()
        };
        let (session, mut events) = open(&transport, options);
        transport.open();

        assert_eq!(next(&mut events).await, SessionEvent::HandshakeTimeout(Duration::from_millis(20)));
        assert_eq!(session.state(), SessionState::Connecting);
        let more = tokio::time::timeout(Duration::from_millis(60), events.recv()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn handshake_timer_starts_when_the_socket_opens() {
        let transport = MockTransport::new();
        let options = SessionOptions {
            handshake_timeout: Some(Duration::from_millis(20)),
            ..SessionOptions::default()
        };
        let (_session, mut events) = open(&transport, options);

        let early = tokio::time::timeout(Duration::from_millis(60), events.recv()).await;
        assert!(early.is_err());

        transport.open();
        assert_eq!(next(&mut events).await, SessionEvent::HandshakeTimeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let (session, _events) = open(&transport, SessionOptions::default());
        transport.open();
        session.subscribe("/topic/encounter/E1");

        session.disconnect();
        session.disconnect();

        assert!(session.is_closed());
        assert!(transport.state().is_closed());
        assert!(session.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn second_session_on_same_transport_fails() {
        let transport = MockTransport::new();
        let (_session, _events) = open(&transport, SessionOptions::default());
        let again = StompSession::open(transport.clone(), request(), SessionOptions::default(), CancellationToken::new());
        assert!(again.is_err());
    }
}
