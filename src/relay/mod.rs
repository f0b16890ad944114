//! Encounter location relay.
//!
//! [`EncounterRelay`] coordinates one encounter at a time: it resolves the
//! local role and bearer token, opens a STOMP session over a fresh transport,
//! subscribes to the encounter topic once CONNECTED arrives, streams local
//! positions when sharing, and folds everything into a [`RelayState`]
//! snapshot that observers can watch.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use encounter_relay::{EncounterRelay, FixedRole, RelayConfig, Role, StaticToken};
//! use encounter_relay::location::ScriptedPositionSource;
//! use encounter_relay::types::{RawFix, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> encounter_relay::Result<()> {
//!     let config = RelayConfig::from_path("relay.yaml")?;
//!     let relay = EncounterRelay::builder(config)
//!         .tokens(Arc::new(StaticToken::new("token")))
//!         .roles(Arc::new(FixedRole(Role::Publisher)))
//!         .position_source(Arc::new(ScriptedPositionSource::repeating(RawFix::new(
//!             -33.45, -70.66, 0,
//!         ))))
//!         .build()?;
//!
//!     relay.start("E1");
//!     let mut updates = relay.subscribe(UpdateRate::Max(2));
//!     while let Some(state) = updates.next().await {
//!         println!("{} positions, connected={}", state.history.len(), state.connected);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::Driver;
use crate::location::{LocationProducer, PositionSource};
use crate::stream::ThrottleExt;
use crate::transport::{Connector, WebSocketConnector};
use crate::types::{EncounterId, PositionSample, UpdateRate};
use crate::{RelayConfig, RelayError, Result, RoleResolver, StaticToken, TokenProvider};

pub(crate) mod coordinator;
mod state;

pub use state::{RelayPhase, RelayState};


/// Commands applied in order on the actor task.
#[derive(Debug)]
pub enum RelayCommand {
    Start(EncounterId),
    SetSharing(bool),
    Stop,
    Sample(PositionSample),
}

/// Handle to a running relay.
///
/// Commands are fire-and-forget; their effect shows up in [`state`](Self::state).
/// Dropping the handle shuts the relay down.
pub struct EncounterRelay {
    commands: mpsc::UnboundedSender<RelayCommand>,
    state: watch::Receiver<Arc<RelayState>>,
    cancel: CancellationToken,
}

impl EncounterRelay {
    pub fn builder(config: RelayConfig) -> RelayBuilder {
        RelayBuilder { config, connector: None, tokens: None, roles: None, source: None }
    }

    /// Begin relaying for `encounter`, leaving any other encounter first.
    ///
    /// No-op while the same encounter is initializing or has a live session.
    pub fn start(&self, encounter: impl Into<EncounterId>) {
        self.send(RelayCommand::Start(encounter.into()));
    }

    /// Turn local position sharing on or off.
    ///
    /// Ignored for subscriber-only roles. Outside an encounter the choice is
    /// kept for the next one.
    pub fn set_sharing(&self, enabled: bool) {
        self.send(RelayCommand::SetSharing(enabled));
    }

    /// Stop the producer, then close the session. Idempotent.
    pub fn stop(&self) {
        self.send(RelayCommand::Stop);
    }

    /// Feed a sample from outside the built-in producer.
    pub fn on_location_sample(&self, sample: PositionSample) {
        self.send(RelayCommand::Sample(sample));
    }

    /// Latest snapshot.
    pub fn state(&self) -> Arc<RelayState> {
        self.state.borrow().clone()
    }

    /// Raw watch receiver, for callers that want `changed()`.
    pub fn watch(&self) -> watch::Receiver<Arc<RelayState>> {
        self.state.clone()
    }

    /// Snapshots as a stream, starting with the current one.
    pub fn subscribe(&self, rate: UpdateRate) -> BoxStream<'static, Arc<RelayState>> {
        let snapshots = WatchStream::new(self.state.clone());
        match rate.throttle_interval() {
            None => snapshots.boxed(),
            Some(interval) => snapshots.throttle(interval).boxed(),
        }
    }

    /// Stop everything. Later commands are ignored.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: RelayCommand) {
        if self.commands.send(command).is_err() {
            debug!("Relay already shut down, command ignored");
        }
    }
}

impl Drop for EncounterRelay {
    fn drop(&mut self) {
        debug!("Dropping encounter relay");
        self.cancel.cancel();
    }
}

/// Wires collaborators into an [`EncounterRelay`].
///
/// Roles and a position source are required. The connector defaults to
/// WebSocket and tokens default to anonymous.
pub struct RelayBuilder {
    config: RelayConfig,
    connector: Option<Arc<dyn Connector>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    roles: Option<Arc<dyn RoleResolver>>,
    source: Option<Arc<dyn PositionSource>>,
}

impl RelayBuilder {
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn roles(mut self, roles: Arc<dyn RoleResolver>) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn position_source(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Validate the configuration and spawn the actor. Needs a Tokio runtime.
    pub fn build(self) -> Result<EncounterRelay> {
        let roles = self.roles.ok_or_else(|| RelayError::config(None, "no role resolver"))?;
        let source = self.source.ok_or_else(|| RelayError::config(None, "no position source"))?;
        let tokens = self.tokens.unwrap_or_else(|| Arc::new(StaticToken::anonymous()));

        let cancel = CancellationToken::new();
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::with_parent(cancel.child_token())));
        let producer = LocationProducer::new(source, cancel.child_token());

        let (state_tx, state_rx) = watch::channel(Arc::new(RelayState::default()));
        let core = coordinator::RelayCore::new(&self.config, connector, producer, state_tx, cancel.clone())?;
        let channels = Driver::spawn(core, state_rx, tokens, roles, cancel);

        Ok(EncounterRelay { commands: channels.commands, state: channels.state, cancel: channels.cancel })
    }
}
