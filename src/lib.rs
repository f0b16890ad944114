//! Real-time location relay for encounters, over STOMP on WebSocket.
//!
//! Two participants of an encounter share their positions through a broker:
//! the publisher streams periodic location samples to
//! `/app/encounter/{id}/pos`, every participant subscribes to
//! `/topic/encounter/{id}`, and each side keeps a bounded, newest-first history
//! of what it has seen.
//!
//! # Layers
//!
//! - [`transport`]: a message-oriented WebSocket connection, one instance per attempt
//! - [`stomp`]: STOMP 1.2 framing and a session that handshakes, subscribes and sends
//! - [`location`]: a cancellable, periodic position producer over a platform source
//! - [`relay`]: the coordinator tying them together and publishing [`RelayState`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use encounter_relay::{EncounterRelay, FixedRole, RelayConfig, Role, StaticToken};
//! use encounter_relay::location::ScriptedPositionSource;
//! use encounter_relay::types::RawFix;
//!
//! #[tokio::main]
//! async fn main() -> encounter_relay::Result<()> {
//!     let relay = EncounterRelay::builder(RelayConfig::new("wss://api.example.com/ws"))
//!         .tokens(Arc::new(StaticToken::new("token")))
//!         .roles(Arc::new(FixedRole(Role::Both)))
//!         .position_source(Arc::new(ScriptedPositionSource::repeating(RawFix::new(
//!             -33.45, -70.66, 0,
//!         ))))
//!         .build()?;
//!
//!     relay.start("E1");
//!     let mut watch = relay.watch();
//!     watch.changed().await.ok();
//!     println!("{:?}", relay.state());
//!     Ok(())
//! }
//! ```

mod collaborators;
mod config;
mod driver;
mod error;
#[cfg(test)]
mod test_utils;

pub mod location;
pub mod relay;
pub mod stomp;
pub mod stream;
pub mod transport;
pub mod types;

pub use collaborators::{FixedRole, RoleResolver, StaticToken, TokenProvider};
pub use config::RelayConfig;
pub use error::*;
pub use location::{Accuracy, Availability, LocationProducer, PositionSource, ProducerEvent};
pub use relay::{EncounterRelay, RelayBuilder, RelayPhase, RelayState};
pub use types::*;
