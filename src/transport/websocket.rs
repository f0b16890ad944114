//! WebSocket transport on tokio-tungstenite

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    ABNORMAL_CLOSURE, ConnectRequest, ConnectionState, Connector, NO_STATUS_RECEIVED, NORMAL_CLOSURE,
    Transport, TransportEvent,
};
use crate::{RelayError, Result};

const CLIENT_DISCONNECT: &str = "client disconnect";

/// Transport over a single WebSocket.
///
/// The socket is driven by one spawned task that owns both halves of the
/// stream. Outbound frames reach it through an unbounded channel; state is
/// published through a watch channel so `send` never takes a lock.
pub struct WebSocketTransport {
    state: Arc<watch::Sender<ConnectionState>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a transport whose socket task also stops when `cancel` fires.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(state),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            cancel,
        }
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, request: ConnectRequest) {
        if !advance(&self.state, ConnectionState::Connecting) {
            debug!(state = ?self.state(), "connect ignored, transport already used");
            return;
        }

        let Some(outbound) = self.outbound_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            warn!("outbound channel already taken");
            return;
        };

        info!(endpoint = %request.endpoint, "Opening WebSocket");
        let state = Arc::clone(&self.state);
        let events = self.events_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            run_socket(request, outbound, events, state, cancel).await;
        });
    }

    fn send(&self, raw: String) {
        if !self.state.borrow().is_open() {
            trace!(len = raw.len(), "socket not open, dropping frame");
            return;
        }
        if self.outbound_tx.send(raw).is_err() {
            trace!("socket task gone, dropping frame");
        }
    }

    fn disconnect(&self) {
        if advance(&self.state, ConnectionState::Closed(CLIENT_DISCONNECT.to_string())) {
            debug!("WebSocket disconnect requested");
            let _ = self.events_tx.send(TransportEvent::Closed {
                code: NORMAL_CLOSURE,
                reason: CLIENT_DISCONNECT.to_string(),
            });
        }
        self.cancel.cancel();
    }

    fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Creates one [`WebSocketTransport`] per connection attempt.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    cancel: Option<CancellationToken>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tie every created transport to a parent token.
    pub fn with_parent(cancel: CancellationToken) -> Self {
        Self { cancel: Some(cancel) }
    }
}

impl Connector for WebSocketConnector {
    fn create(&self) -> Arc<dyn Transport> {
        let cancel = match &self.cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        Arc::new(WebSocketTransport::with_cancellation(cancel))
    }
}

/// Move the state forward. Returns false if `next` is not ahead of the current state.
fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) -> bool {
    state.send_if_modified(|current| {
        if rank(&next) > rank(current) {
            *current = next;
            true
        } else {
            false
        }
    })
}

fn rank(state: &ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Open => 2,
        ConnectionState::Closed(_) => 3,
    }
}

fn build_request(request: &ConnectRequest) -> Result<Request> {
    let mut client_request = request.url().as_str().into_client_request()?;
    for (key, value) in request.headers() {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| RelayError::transport_failed(format!("invalid header name {key:?}: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| RelayError::transport_failed(format!("invalid value for {key}: {e}")))?;
        client_request.headers_mut().insert(name, value);
    }
    Ok(client_request)
}

fn close(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    code: u16,
    reason: String,
) {
    if advance(state, ConnectionState::Closed(reason.clone())) {
        info!(code, reason = %reason, "WebSocket closed");
        let _ = events.send(TransportEvent::Closed { code, reason });
    }
}

fn fail(
    state: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    cause: String,
) {
    // a failure after a client disconnect is just the socket winding down
    if state.borrow().is_closed() {
        debug!("ignoring error after close: {}", cause);
        return;
    }
    error!("WebSocket error: {}", cause);
    let _ = events.send(TransportEvent::TransportError(cause.clone()));
    close(state, events, ABNORMAL_CLOSURE, cause);
}

async fn run_socket(
    request: ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
) {
    let client_request = match build_request(&request) {
        Ok(client_request) => client_request,
        Err(e) => {
            fail(&state, &events, e.to_string());
            return;
        }
    };

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Cancelled before the socket opened");
            return;
        }
        result = connect_async(client_request) => result,
    };

    let socket = match connected {
        Ok((socket, response)) => {
            debug!(status = %response.status(), "WebSocket upgrade complete");
            socket
        }
        Err(e) => {
            fail(&state, &events, format!("connect failed: {e}"));
            return;
        }
    };

    if !advance(&state, ConnectionState::Open) {
        debug!("Socket opened after disconnect, dropping it");
        return;
    }
    let _ = events.send(TransportEvent::Opened);

    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let frame = CloseFrame { code: CloseCode::Normal, reason: CLIENT_DISCONNECT.into() };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!("close frame not delivered: {}", e);
                }
                break;
            }
            Some(raw) = outbound.recv() => {
                trace!(len = raw.len(), "ws out");
                if let Err(e) = write.send(Message::Text(raw.into())).await {
                    fail(&state, &events, format!("send failed: {e}"));
                    break;
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "ws in (text)");
                    let _ = events.send(TransportEvent::FrameReceived(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    trace!(len = bytes.len(), "ws in (binary)");
                    let raw = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = events.send(TransportEvent::FrameReceived(raw));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    close(&state, &events, code, reason);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    fail(&state, &events, e.to_string());
                    break;
                }
                None => {
                    close(&state, &events, ABNORMAL_CLOSURE, "stream ended".to_string());
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(port: u16) -> ConnectRequest {
        ConnectRequest::new(Url::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap())
    }

    #[tokio::test]
    async fn send_before_open_is_dropped() {
        let transport = WebSocketTransport::new();
        transport.send("SEND\n\n\0".to_string());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_idempotent() {
        let transport = WebSocketTransport::new();
        let mut events = transport.take_events().unwrap();
        assert!(transport.take_events().is_none());

        transport.disconnect();
        transport.disconnect();
        transport.connect(request(9));

        assert!(transport.state().is_closed());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed { code: NORMAL_CLOSURE, reason: CLIENT_DISCONNECT.into() })
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_close() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = WebSocketTransport::new();
        let mut events = transport.take_events().unwrap();
        transport.connect(request(port));

        let first = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(matches!(first, Some(TransportEvent::TransportError(_))));
        let second = events.recv().await;
        assert!(matches!(second, Some(TransportEvent::Closed { code: ABNORMAL_CLOSURE, .. })));
        assert!(transport.state().is_closed());
    }

    #[tokio::test]
    async fn close_without_status_is_not_a_normal_closure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let transport = WebSocketTransport::new();
        let mut events = transport.take_events().unwrap();
        transport.connect(request(port));

        let wait = std::time::Duration::from_secs(5);
        let opened = tokio::time::timeout(wait, events.recv()).await.unwrap();
        assert_eq!(opened, Some(TransportEvent::Opened));
        let closed = tokio::time::timeout(wait, events.recv()).await.unwrap();
        assert_eq!(closed, Some(TransportEvent::Closed { code: NO_STATUS_RECEIVED, reason: String::new() }));
    }
}
