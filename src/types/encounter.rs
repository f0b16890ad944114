//! Encounter identity and the local actor's role in it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a scheduled, in-progress house-call encounter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(transparent)]
pub struct EncounterId(String);

impl EncounterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Topic the peer's positions are broadcast on.
    pub fn topic(&self) -> String {
        format!("/topic/encounter/{}", self.0)
    }

    /// Destination local positions are sent to.
    pub fn position_destination(&self) -> String {
        format!("/app/encounter/{}/pos", self.0)
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EncounterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EncounterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Whether the local actor emits its own position, consumes the peer's, or both.
///
/// The veterinarian side publishes; the client side subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum Role {
    Publisher,
    Subscriber,
    Both,
}

impl Role {
    /// Returns true when this side may stream its own location.
    pub fn publishes(self) -> bool {
        matches!(self, Role::Publisher | Role::Both)
    }
}
