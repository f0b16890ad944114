//! Error types for the encounter relay.
//!
//! All errors implement `std::error::Error` and carry enough context to be shown
//! to a user as-is (the coordinator surfaces them through `RelayState::last_error`).
//!
//! ## Error Categories
//!
//! - **Transport Errors**: socket-level failures, surfaced but never retried
//! - **Parse Errors**: malformed STOMP frames or JSON bodies, dropped locally
//! - **Permission Errors**: the positioning capability is unavailable
//! - **Protocol Timeouts**: the server never acknowledged CONNECT
//! - **Collaborator Errors**: token or role resolution failed
//! - **Configuration Errors**: invalid or unreadable relay configuration
//!
//! ```rust
//! use encounter_relay::RelayError;
//!
//! let error = RelayError::transport_failed("connection reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Permission denied for {capability}")]
    PermissionDenied { capability: String },

    #[error("No CONNECTED reply after {duration:?}")]
    ProtocolTimeout { duration: Duration },

    #[error("{collaborator} failed: {reason}")]
    Collaborator { collaborator: &'static str, reason: String },

    #[error("Invalid configuration{}: {details}", config_location(.path))]
    Config { path: Option<PathBuf>, details: String },

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RelayError {
    /// Returns whether calling `start()` again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport { .. } => true,
            RelayError::ProtocolTimeout { .. } => true,
            RelayError::Collaborator { .. } => true,
            RelayError::Parse { .. } => false,
            RelayError::PermissionDenied { .. } => false,
            RelayError::Config { .. } => false,
            RelayError::InvalidUrl(_) => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::Transport { .. } => vec![
                "Check network connectivity",
                "Verify the relay endpoint is reachable",
                "Start tracking the encounter again",
            ],
            RelayError::Parse { .. } => vec![
                "Check the peer sends the expected position format",
                "Verify server and client protocol versions match",
            ],
            RelayError::PermissionDenied { .. } => vec![
                "Grant location permission to the application",
                "Enable device location services",
            ],
            RelayError::ProtocolTimeout { .. } => vec![
                "Verify the endpoint speaks STOMP 1.2",
                "Increase the handshake timeout",
                "Start tracking the encounter again",
            ],
            RelayError::Collaborator { .. } => vec![
                "Sign in again to refresh the session token",
                "Check the encounter still exists",
            ],
            RelayError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Use a ws:// or wss:// endpoint",
            ],
            RelayError::InvalidUrl(_) => vec!["Use an absolute ws:// or wss:// endpoint URL"],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        RelayError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RelayError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for permission errors.
    pub fn permission_denied(capability: impl Into<String>) -> Self {
        RelayError::PermissionDenied { capability: capability.into() }
    }

    /// Helper constructor for collaborator failures.
    pub fn collaborator(collaborator: &'static str, reason: impl Into<String>) -> Self {
        RelayError::Collaborator { collaborator, reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(path: Option<PathBuf>, details: impl Into<String>) -> Self {
        RelayError::Config { path, details: details.into() }
    }
}

fn config_location(path: &Option<PathBuf>) -> String {
    path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default()
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Parse { context: "JSON body".to_string(), details: err.to_string() }
    }
}

impl From<serde_yaml_ng::Error> for RelayError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        RelayError::Config { path: None, details: err.to_string() }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::Transport { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}
