//! Relay configuration.
//!
//! Loaded from YAML:
//!
//! ```yaml
//! endpoint: wss://api.example.com/ws
//! location_interval_ms: 5000
//! accuracy: high
//! share_on_start: true
//! history_capacity: 50
//! heart_beat: [10000, 10000]
//! handshake_timeout_ms: 15000
//! ```
//!
//! Only `endpoint` is required.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::location::Accuracy;
use crate::stomp::{HeartBeat, SessionOptions};
use crate::types::DEFAULT_HISTORY_CAPACITY;
use crate::{RelayError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Base WebSocket endpoint, `ws://` or `wss://`.
    pub endpoint: String,
    #[serde(default = "default_interval_ms")]
    pub location_interval_ms: u64,
    #[serde(default)]
    pub accuracy: Accuracy,
    /// Initial sharing preference for publishing roles.
    #[serde(default = "default_true")]
    pub share_on_start: bool,
    #[serde(default = "default_capacity")]
    pub history_capacity: usize,
    /// `[outgoing_ms, incoming_ms]` announced on CONNECT.
    #[serde(default = "default_heart_beat")]
    pub heart_beat: [u32; 2],
    /// Time allowed for CONNECTED after the socket opens. Unset waits forever.
    #[serde(default)]
    pub handshake_timeout_ms: Option<u64>,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_heart_beat() -> [u32; 2] {
    [10_000, 10_000]
}

impl RelayConfig {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            location_interval_ms: default_interval_ms(),
            accuracy: Accuracy::default(),
            share_on_start: true,
            history_capacity: default_capacity(),
            heart_beat: default_heart_beat(),
            handshake_timeout_ms: None,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RelayConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| RelayError::config(Some(path.to_path_buf()), e.to_string()))?;
        Self::from_yaml_str(&yaml).map_err(|e| match e {
            RelayError::Config { path: None, details } => {
                RelayError::config(Some(path.to_path_buf()), details)
            }
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.endpoint_url()?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::config(
                None,
                format!("endpoint scheme must be ws or wss, got {}", url.scheme()),
            ));
        }
        if self.location_interval_ms == 0 {
            return Err(RelayError::config(None, "location_interval_ms must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(RelayError::config(None, "history_capacity must be positive"));
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.endpoint)?)
    }

    pub fn location_interval(&self) -> Duration {
        Duration::from_millis(self.location_interval_ms)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            heart_beat: HeartBeat { outgoing_ms: self.heart_beat[0], incoming_ms: self.heart_beat[1] },
            handshake_timeout: self.handshake_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config = RelayConfig::from_yaml_str("endpoint: wss://api.example.com/ws").unwrap();

        assert_eq!(config, RelayConfig::new("wss://api.example.com/ws"));
        assert_eq!(config.location_interval(), Duration::from_secs(5));
        assert_eq!(config.session_options(), SessionOptions::default());
    }

    #[test]
    fn full_yaml() {
        let yaml = r#"
endpoint: ws://10.0.2.2:8080/ws
location_interval_ms: 2000
accuracy: low_power
share_on_start: false
history_capacity: 20
heart_beat: [0, 0]
handshake_timeout_ms: 15000
"#;
        let config = RelayConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.accuracy, Accuracy::LowPower);
        assert!(!config.share_on_start);
        assert_eq!(config.history_capacity, 20);
        assert_eq!(
            config.session_options(),
            SessionOptions {
                heart_beat: HeartBeat { outgoing_ms: 0, incoming_ms: 0 },
                handshake_timeout: Some(Duration::from_secs(15)),
            }
        );
    }

    #[test]
    fn rejects_invalid_values() {
        for yaml in [
            "endpoint: https://api.example.com/ws",
            "endpoint: not a url",
            "endpoint: ws://h/ws\nlocation_interval_ms: 0",
            "endpoint: ws://h/ws\nhistory_capacity: 0",
            "endpoint: ws://h/ws\nunknown_key: 1",
            "location_interval_ms: 10",
        ] {
            assert!(RelayConfig::from_yaml_str(yaml).is_err(), "accepted {yaml:?}");
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = RelayConfig::from_path("/definitely/not/here/relay.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here/relay.yaml"));
    }
}
