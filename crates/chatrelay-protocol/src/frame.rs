//! Server → client frames.

use std::fmt;

use crate::ProtocolError;

/// Prefix of a directory response.
pub const CLIENTS_PREFIX: &str = "CLIENTS:";
/// Prefix of an error frame.
pub const ERROR_PREFIX: &str = "ERROR: ";

const BROADCAST_MARKER: &str = " (ALL)";
const SENDER_SEPARATOR: &str = ": ";

/// Longest message frame a relay can produce from client frames of at most
/// `max_frame_len` bytes sent by identifiers of at most `max_id_len` bytes.
///
/// The relayed text is never longer than the client frame it came from,
/// so the worst case is a broadcast: `<id> (ALL): <text>`.
pub const fn max_relayed_len(max_frame_len: usize, max_id_len: usize) -> usize {
    max_frame_len + max_id_len + BROADCAST_MARKER.len() + SENDER_SEPARATOR.len()
}

/// Why the server refused a frame or a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another live peer already holds the identifier.
    IdInUse,
    /// The registration frame was blank.
    EmptyId,
    /// The identifier was longer than the server allows.
    IdTooLong { max: usize },
    /// The peer did not register in time.
    HandshakeTimeout,
    /// A frame matched none of `LIST`, `ALL:`, or `TO:`.
    Malformed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdInUse => f.write_str("ID already in use"),
            Self::EmptyId => f.write_str("ID cannot be empty"),
            Self::IdTooLong { max } => write!(f, "ID too long (max {max} bytes)"),
            Self::HandshakeTimeout => f.write_str("registration timed out"),
            Self::Malformed => {
                f.write_str("Use TO:<id>:<message> or ALL:<message>")
            }
        }
    }
}

impl From<&ProtocolError> for Rejection {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::IdTooLong { max } => Self::IdTooLong { max: *max },
            ProtocolError::EmptyId => Self::EmptyId,
            _ => Self::Malformed,
        }
    }
}

/// A frame the server sends to a peer.
///
/// `Display` renders the exact wire text (without the line terminator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// `CLIENTS:<id1>,<id2>,...`
    Directory(Vec<String>),
    /// `ERROR: <reason>`
    Error(String),
    /// `<from> (ALL): <text>`
    Broadcast { from: String, text: String },
    /// `<from>: <text>`
    Direct { from: String, text: String },
}

impl ServerFrame {
    /// Builds an error frame for a rejection.
    pub fn rejection(reason: Rejection) -> Self {
        Self::Error(reason.to_string())
    }

    /// Parses a line received from the server.
    ///
    /// Senders are identified by the first `": "` in the line, so an
    /// identifier that itself contains `": "` will be split early.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if let Some(list) = line.strip_prefix(CLIENTS_PREFIX) {
            let ids = if list.is_empty() {
                Vec::new()
            } else {
                list.split(',').map(str::to_string).collect()
            };
            return Ok(Self::Directory(ids));
        }
        if let Some(reason) = line.strip_prefix(ERROR_PREFIX) {
            return Ok(Self::Error(reason.to_string()));
        }
        let (head, text) = line
            .split_once(SENDER_SEPARATOR)
            .ok_or_else(|| ProtocolError::UnrecognizedFrame(line.to_string()))?;
        let frame = match head.strip_suffix(BROADCAST_MARKER) {
            Some(from) => Self::Broadcast {
                from: from.to_string(),
                text: text.to_string(),
            },
            None => Self::Direct {
                from: head.to_string(),
                text: text.to_string(),
            },
        };
        Ok(frame)
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(ids) => write!(f, "{CLIENTS_PREFIX}{}", ids.join(",")),
            Self::Error(reason) => write!(f, "{ERROR_PREFIX}{reason}"),
            Self::Broadcast { from, text } => {
                write!(f, "{from}{BROADCAST_MARKER}: {text}")
            }
            Self::Direct { from, text } => write!(f, "{from}: {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_broadcast_fits_relayed_len() {
        let max_frame_len = 4096;
        let id = "i".repeat(64);
        let text = "x".repeat(max_frame_len - "ALL:".len());
        let relayed = ServerFrame::Broadcast { from: id, text }.to_string();
        assert!(relayed.len() <= max_relayed_len(max_frame_len, 64));
    }

    #[test]
    fn test_wire_text_matches_protocol_table() {
        assert_eq!(
            ServerFrame::Directory(vec!["A".into(), "B".into()]).to_string(),
            "CLIENTS:A,B"
        );
        assert_eq!(
            ServerFrame::rejection(Rejection::IdInUse).to_string(),
            "ERROR: ID already in use"
        );
        assert_eq!(
            ServerFrame::Broadcast {
                from: "A".into(),
                text: "hello".into()
            }
            .to_string(),
            "A (ALL): hello"
        );
        assert_eq!(
            ServerFrame::Direct {
                from: "A".into(),
                text: "secret".into()
            }
            .to_string(),
            "A: secret"
        );
    }

    #[test]
    fn test_malformed_rejection_names_both_forms() {
        let text = ServerFrame::rejection(Rejection::Malformed).to_string();
        assert!(text.starts_with("ERROR: "));
        assert!(text.contains("TO:<id>:<message>"));
        assert!(text.contains("ALL:<message>"));
    }

    #[test]
    fn test_parse_directory() {
        assert_eq!(
            ServerFrame::parse("CLIENTS:A,B,C").unwrap(),
            ServerFrame::Directory(vec!["A".into(), "B".into(), "C".into()])
        );
        assert_eq!(
            ServerFrame::parse("CLIENTS:").unwrap(),
            ServerFrame::Directory(vec![])
        );
    }

    #[test]
    fn test_parse_error_before_direct() {
        assert_eq!(
            ServerFrame::parse("ERROR: ID already in use").unwrap(),
            ServerFrame::Error("ID already in use".into())
        );
    }

    #[test]
    fn test_parse_deliveries_keep_colons_in_text() {
        assert_eq!(
            ServerFrame::parse("A (ALL): see you at 10:30").unwrap(),
            ServerFrame::Broadcast {
                from: "A".into(),
                text: "see you at 10:30".into()
            }
        );
        assert_eq!(
            ServerFrame::parse("A: 10:30:00").unwrap(),
            ServerFrame::Direct {
                from: "A".into(),
                text: "10:30:00".into()
            }
        );
    }

    #[test]
    fn test_parse_unknown_line_fails() {
        assert!(matches!(
            ServerFrame::parse("nonsense"),
            Err(ProtocolError::UnrecognizedFrame(_))
        ));
    }

    #[test]
    fn test_rejection_from_protocol_error() {
        assert_eq!(
            Rejection::from(&ProtocolError::IdTooLong { max: 8 }),
            Rejection::IdTooLong { max: 8 }
        );
        assert_eq!(
            Rejection::from(&ProtocolError::EmptyId),
            Rejection::EmptyId
        );
    }
}
