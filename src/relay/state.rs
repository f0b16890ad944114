//! Observable coordinator state

use serde::Serialize;

use crate::types::{EncounterId, PositionSample, Role};

/// Coordinator lifecycle for the current encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum RelayPhase {
    #[default]
    Idle,
    /// Resolving role and token before dialing.
    Initializing,
    /// Session opened; `connected` says whether CONNECTED arrived.
    Active,
}

/// Snapshot published after every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub struct RelayState {
    pub encounter_id: Option<EncounterId>,
    pub role: Option<Role>,
    pub phase: RelayPhase,
    /// Socket open and CONNECTED received.
    pub connected: bool,
    /// The producer is running for the active encounter.
    pub sharing: bool,
    /// Newest first.
    pub history: Vec<PositionSample>,
    /// Last non-fatal error, for display.
    pub last_error: Option<String>,
}

impl RelayState {
    pub fn is_active(&self) -> bool {
        self.phase == RelayPhase::Active
    }

    pub fn latest_position(&self) -> Option<&PositionSample> {
        self.history.first()
    }
}
