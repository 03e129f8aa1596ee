//! Server configuration.

use std::path::Path;
use std::time::Duration;

use chatrelay_protocol::{DEFAULT_MAX_ID_LEN, max_relayed_len};
use chatrelay_registry::DEFAULT_OUTBOX_LEN;
use chatrelay_transport::{DEFAULT_MAX_FRAME_LEN, FrameLimits};
use serde::Deserialize;

use crate::RelayError;

/// Default listen address: every interface, port 5555.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5555";

/// Settings for a [`RelayServer`](crate::RelayServer).
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```json
/// { "bind_addr": "127.0.0.1:7000", "max_id_len": 32 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the server listens on.
    pub bind_addr: String,

    /// Largest accepted frame, in bytes, excluding the line terminator.
    /// A peer that sends a longer line is disconnected.
    pub max_frame_len: usize,

    /// Largest accepted identifier, in bytes, after trimming.
    pub max_id_len: usize,

    /// Frames each peer may have waiting for its socket. Past that, new
    /// frames for the peer are dropped and reported as delivery failures.
    pub outbound_queue_len: usize,

    /// How long a new peer may take to send its identifier. `None` waits
    /// forever.
    pub handshake_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_id_len: DEFAULT_MAX_ID_LEN,
            outbound_queue_len: DEFAULT_OUTBOX_LEN,
            handshake_timeout_secs: None,
        }
    }
}

impl RelayConfig {
    /// Parses a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| {
            RelayError::ConfigRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_json_str(&json)
    }

    /// The handshake timeout as a `Duration`.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    /// Longest line the server writes: a full-size message plus the
    /// sender prefix it gains when relayed.
    pub fn max_relayed_len(&self) -> usize {
        max_relayed_len(self.max_frame_len, self.max_id_len)
    }

    /// Frame limits for the server side of a connection.
    pub fn server_frame_limits(&self) -> FrameLimits {
        FrameLimits::new(self.max_frame_len, self.max_relayed_len())
    }

    /// Frame limits for a client of a server running this config: the
    /// server's limits with the directions swapped.
    pub fn client_frame_limits(&self) -> FrameLimits {
        FrameLimits::new(self.max_relayed_len(), self.max_frame_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:5555");
        assert_eq!(config.max_frame_len, 4096);
        assert_eq!(config.max_id_len, 64);
        assert_eq!(config.outbound_queue_len, 64);
        assert_eq!(config.handshake_timeout(), None);
    }

    #[test]
    fn test_relayed_frames_get_room_for_the_prefix() {
        let config = RelayConfig {
            max_frame_len: 100,
            max_id_len: 10,
            ..RelayConfig::default()
        };
        // "<id> (ALL): " around the message body.
        assert_eq!(config.max_relayed_len(), 100 + 10 + " (ALL)".len() + ": ".len());

        let server = config.server_frame_limits();
        assert_eq!(server.inbound, 100);
        assert_eq!(server.outbound, config.max_relayed_len());

        let client = config.client_frame_limits();
        assert_eq!(client.inbound, server.outbound);
        assert_eq!(client.outbound, server.inbound);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RelayConfig::from_json_str(
            r#"{ "bind_addr": "127.0.0.1:7000", "handshake_timeout_secs": 5, "outbound_queue_len": 8 }"#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
        assert_eq!(config.outbound_queue_len, 8);
        assert_eq!(config.max_id_len, 64);
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = RelayConfig::from_json_str(r#"{ "bind": "x" }"#);
        assert!(matches!(result, Err(RelayError::ConfigParse(_))));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = RelayConfig::from_json_file("/nonexistent/chatrelay.json")
            .unwrap_err();
        assert!(matches!(err, RelayError::ConfigRead { .. }));
        assert!(err.to_string().contains("/nonexistent/chatrelay.json"));
    }
}
