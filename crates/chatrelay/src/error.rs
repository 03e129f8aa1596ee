//! Unified error type for the chatrelay server and client.

use std::net::SocketAddr;
use std::path::PathBuf;

use chatrelay_protocol::{ClientId, ProtocolError, Rejection};
use chatrelay_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Only [`RelayError::Bind`] ever escapes [`RelayServer::start`]; every
/// other variant describes the fate of a single connection and ends at that
/// connection's handler.
///
/// [`RelayServer::start`]: crate::RelayServer::start
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listening socket could not be set up.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called while the server was already listening.
    #[error("server already listening on {0}")]
    AlreadyRunning(SocketAddr),

    /// A peer's registration was refused.
    #[error("handshake rejected: {0}")]
    Handshake(Rejection),

    /// A frame could not be written to its recipient.
    #[error("delivery to {to} failed: {source}")]
    Delivery {
        to: ClientId,
        #[source]
        source: TransportError,
    },

    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(TransportError),

    /// A protocol-level error (bad identifier, unsendable text).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::BindFailed { addr, source } => {
                Self::Bind { addr, source }
            }
            other => Self::Transport(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_failure_maps_to_bind() {
        let err = TransportError::BindFailed {
            addr: "0.0.0.0:5555".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Bind { .. }));
        assert!(relay_err.to_string().contains("0.0.0.0:5555"));
    }

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let relay_err: RelayError = err.into();
        assert!(matches!(relay_err, RelayError::Transport(_)));
        assert!(relay_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let relay_err: RelayError = ProtocolError::EmptyId.into();
        assert!(matches!(relay_err, RelayError::Protocol(_)));
    }

    #[test]
    fn test_handshake_error_names_reason() {
        let err = RelayError::Handshake(Rejection::IdInUse);
        assert_eq!(err.to_string(), "handshake rejected: ID already in use");
    }
}
