//! Synchronous state machine behind the relay actor.
//!
//! Every method runs to completion on the actor task and publishes a fresh
//! snapshot when it changed anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::state::{RelayPhase, RelayState};
use crate::location::{Accuracy, LocationProducer, ProducerEvent};
use crate::stomp::{SessionEvent, SessionOptions, StompSession};
use crate::transport::{ConnectRequest, Connector, NORMAL_CLOSURE};
use crate::types::{EncounterId, PositionHistory, PositionSample, Role};
use crate::{RelayConfig, RelayError, Result};

/// Something the actor received from the live session.
#[derive(Debug)]
pub(crate) enum LinkInput {
    Session(SessionEvent),
    Sample(PositionSample),
    /// The producer stopped by itself, typically on revoked permission.
    ProducerEnded(RelayError),
}

/// Receivers owned by the current encounter.
struct Link {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    samples: mpsc::UnboundedReceiver<ProducerEvent>,
}

pub(crate) struct RelayCore {
    endpoint: Url,
    interval: Duration,
    accuracy: Accuracy,
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    producer: LocationProducer,
    state_tx: watch::Sender<Arc<RelayState>>,
    cancel: CancellationToken,

    encounter: Option<EncounterId>,
    role: Option<Role>,
    phase: RelayPhase,
    connected: bool,
    /// True only while the producer runs for the active encounter.
    sharing: bool,
    /// Survives encounters and subscriber roles.
    share_preference: bool,
    history: PositionHistory,
    last_error: Option<String>,

    session: Option<StompSession>,
    samples_tx: Option<mpsc::UnboundedSender<ProducerEvent>>,
    link: Option<Link>,
}

impl RelayCore {
    pub(crate) fn new(
        config: &RelayConfig,
        connector: Arc<dyn Connector>,
        producer: LocationProducer,
        state_tx: watch::Sender<Arc<RelayState>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let core = Self {
            endpoint: config.endpoint_url()?,
            interval: config.location_interval(),
            accuracy: config.accuracy,
            options: config.session_options(),
            connector,
            producer,
            state_tx,
            cancel,
            encounter: None,
            role: None,
            phase: RelayPhase::Idle,
            connected: false,
            sharing: false,
            share_preference: config.share_on_start,
            history: PositionHistory::with_capacity(config.history_capacity),
            last_error: None,
            session: None,
            samples_tx: None,
            link: None,
        };
        core.publish();
        Ok(core)
    }

    /// True when `start(encounter)` would change nothing.
    pub(crate) fn is_tracking(&self, encounter: &EncounterId) -> bool {
        self.encounter.as_ref() == Some(encounter)
            && match self.phase {
                RelayPhase::Idle => false,
                RelayPhase::Initializing => true,
                RelayPhase::Active => self.session.as_ref().is_some_and(|s| !s.is_closed()),
            }
    }

    /// Leave any previous encounter and enter `Initializing` for a new one.
    pub(crate) fn prepare(&mut self, encounter: EncounterId) {
        self.teardown();
        info!(%encounter, "Preparing encounter");
        self.history.clear();
        self.last_error = None;
        self.role = None;
        self.encounter = Some(encounter);
        self.phase = RelayPhase::Initializing;
        self.publish();
    }

    /// Role and token resolved: dial and, for publishers, start sharing.
    pub(crate) fn begin(&mut self, role: Role, token: Option<String>) {
        let (Some(encounter), RelayPhase::Initializing) = (self.encounter.clone(), self.phase) else {
            debug!("begin without a prepared encounter");
            return;
        };

        let request = ConnectRequest::new(self.endpoint.clone()).with_bearer_token(token);
        let transport = self.connector.create();
        let (session, events) =
            match StompSession::open(transport, request, self.options, self.cancel.child_token()) {
                Ok(opened) => opened,
                Err(e) => {
                    self.fail_start(e);
                    return;
                }
            };

        let (samples_tx, samples) = mpsc::unbounded_channel();
        self.session = Some(session);
        self.samples_tx = Some(samples_tx);
        self.link = Some(Link { events, samples });
        self.role = Some(role);
        self.phase = RelayPhase::Active;
        info!(%encounter, ?role, "Encounter active");

        self.sharing = role.publishes() && self.share_preference && self.start_producer();
        self.publish();
    }

    /// Role or token could not be resolved.
    pub(crate) fn fail_start(&mut self, error: RelayError) {
        if self.phase != RelayPhase::Initializing {
            return;
        }
        warn!("Encounter start failed: {}", error);
        self.last_error = Some(error.to_string());
        self.phase = RelayPhase::Idle;
        self.publish();
    }

    pub(crate) fn set_sharing(&mut self, enabled: bool) {
        if self.phase != RelayPhase::Active {
            debug!(enabled, "Sharing preference kept for the next encounter");
            self.share_preference = enabled;
            return;
        }

        if enabled && !self.role.is_some_and(Role::publishes) {
            debug!("Sharing ignored for a subscriber");
            return;
        }

        self.share_preference = enabled;
        if enabled {
            self.sharing = self.start_producer();
        } else {
            self.producer.stop();
            self.sharing = false;
        }
        self.publish();
    }

    /// Publish a local sample and record it, whether or not the socket is up.
    pub(crate) fn on_location_sample(&mut self, sample: PositionSample) {
        let (Some(encounter), RelayPhase::Active) = (&self.encounter, self.phase) else {
            trace!("Sample outside an active encounter dropped");
            return;
        };
        if let Err(e) = sample.validate() {
            warn!("Dropping local sample: {}", e);
            return;
        }

        match (sample.to_wire(), &self.session) {
            (Ok(body), Some(session)) => session.send(&encounter.position_destination(), &body),
            (Ok(_), None) => trace!("No session for outgoing sample"),
            (Err(e), _) => warn!("Failed to encode sample: {}", e),
        }
        self.history.push(sample);
        self.publish();
    }

    /// A MESSAGE from the broker.
    pub(crate) fn on_inbound_message(&mut self, destination: &str, body: &str) {
        let Some(encounter) = &self.encounter else {
            return;
        };
        if destination != encounter.topic() {
            debug!(destination, "Message for another destination ignored");
            return;
        }

        match PositionSample::from_wire(body) {
            Ok(sample) => {
                trace!(lat = sample.lat, lng = sample.lng, "Remote position");
                self.history.push(sample);
            }
            Err(e) => {
                warn!("Discarding inbound position: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
        self.publish();
    }

    pub(crate) fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.connected = true;
                if let (Some(session), Some(encounter)) = (&self.session, &self.encounter) {
                    session.subscribe(&encounter.topic());
                }
            }
            SessionEvent::Message { destination, body } => {
                self.on_inbound_message(&destination, &body);
                return;
            }
            SessionEvent::TransportError(cause) => {
                self.connected = false;
                self.last_error = Some(RelayError::transport_failed(cause).to_string());
            }
            SessionEvent::HandshakeTimeout(duration) => {
                self.last_error = Some(RelayError::ProtocolTimeout { duration }.to_string());
            }
            SessionEvent::Closed { code, reason } => {
                self.connected = false;
                if code != NORMAL_CLOSURE && self.last_error.is_none() {
                    self.last_error = Some(
                        RelayError::transport_failed(format!("closed with code {code}: {reason}"))
                            .to_string(),
                    );
                }
                info!(code, reason, "Session closed");
            }
        }
        self.publish();
    }

    pub(crate) fn stop(&mut self) {
        self.teardown();
        self.phase = RelayPhase::Idle;
        self.publish();
    }

    /// Wait for the next session event or produced sample.
    ///
    /// Pending forever while no encounter is active.
    pub(crate) async fn next_input(&mut self) -> LinkInput {
        let Some(link) = self.link.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            Some(event) = link.events.recv() => LinkInput::Session(event),
            Some(produced) = link.samples.recv() => match produced {
                ProducerEvent::Sample(sample) => LinkInput::Sample(sample),
                ProducerEvent::Ended(error) => LinkInput::ProducerEnded(error),
            },
            else => std::future::pending().await,
        }
    }

    pub(crate) fn handle(&mut self, input: LinkInput) {
        match input {
            LinkInput::Session(event) => self.on_session_event(event),
            LinkInput::Sample(sample) => self.on_location_sample(sample),
            LinkInput::ProducerEnded(error) => self.on_producer_ended(error),
        }
    }

    /// The session stays up; only sharing ends.
    fn on_producer_ended(&mut self, error: RelayError) {
        warn!("Location sharing ended: {}", error);
        self.producer.stop();
        self.sharing = false;
        self.last_error = Some(error.to_string());
        self.publish();
    }

    /// Producer first, then the session.
    pub(crate) fn teardown(&mut self) {
        self.producer.stop();
        self.samples_tx = None;
        if let Some(session) = self.session.take() {
            session.disconnect();
        }
        self.link = None;
        self.connected = false;
        self.sharing = false;
    }

    /// Returns whether the producer is running afterwards.
    fn start_producer(&mut self) -> bool {
        let Some(sink) = self.samples_tx.clone() else {
            return false;
        };
        match self.producer.start(self.interval, self.accuracy, sink) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot share location: {}", e);
                self.last_error = Some(e.to_string());
                self.sharing = false;
                false
            }
        }
    }

    fn publish(&self) {
        let snapshot = RelayState {
            encounter_id: self.encounter.clone(),
            role: self.role,
            phase: self.phase,
            connected: self.connected,
            sharing: self.sharing,
            history: self.history.to_vec(),
            last_error: self.last_error.clone(),
        };
        self.state_tx.send_if_modified(|current| {
            if **current == snapshot {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });
    }
}
