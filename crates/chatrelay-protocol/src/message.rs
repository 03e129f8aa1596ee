//! Client → server frames.
//!
//! [`RoutedMessage`] is the server's view: every frame after registration
//! parses into exactly one variant, including `Malformed` for everything
//! else. [`ClientFrame`] is the peer's view: it builds frames and refuses
//! to produce one the server could not read back.

use crate::ProtocolError;

/// Directory query keyword.
pub const LIST: &str = "LIST";
/// Prefix of a broadcast frame.
pub const BROADCAST_PREFIX: &str = "ALL:";
/// Prefix of a direct message frame.
pub const DIRECT_PREFIX: &str = "TO:";

/// A parsed client frame, borrowing from the raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedMessage<'a> {
    /// `ALL:<text>` — deliver to every other registered peer.
    Broadcast { text: &'a str },

    /// `TO:<target>:<text>` — deliver to one peer.
    Direct { target_id: &'a str, text: &'a str },

    /// `LIST` — ask for the directory of registered identifiers.
    ListQuery,

    /// Anything else.
    Malformed { raw: &'a str },
}

impl<'a> RoutedMessage<'a> {
    /// Classifies a frame. Rules are checked in order:
    ///
    /// 1. exactly `LIST`
    /// 2. prefix `ALL:`, the remainder is the text
    /// 3. prefix `TO:`, then a non-empty target up to the next `:`; the
    ///    text is everything after it, colons included
    /// 4. otherwise `Malformed`
    pub fn parse(frame: &'a str) -> Self {
        if frame == LIST {
            return Self::ListQuery;
        }
        if let Some(text) = frame.strip_prefix(BROADCAST_PREFIX) {
            return Self::Broadcast { text };
        }
        if let Some(rest) = frame.strip_prefix(DIRECT_PREFIX) {
            if let Some((target_id, text)) = rest.split_once(':') {
                if !target_id.is_empty() {
                    return Self::Direct { target_id, text };
                }
            }
        }
        Self::Malformed { raw: frame }
    }
}

/// A frame a peer sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// First frame on a connection: the identifier to register under.
    Register(String),
    /// Message for every other peer.
    Broadcast(String),
    /// Message for one peer.
    Direct { target: String, text: String },
    /// Directory query.
    List,
}

impl ClientFrame {
    /// Renders the frame as a single wire line, without the terminator.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            Self::Register(id) => {
                let id = id.trim();
                if id.is_empty() {
                    return Err(ProtocolError::EmptyId);
                }
                reject_line_breaks(id)?;
                Ok(id.to_string())
            }
            Self::Broadcast(text) => {
                check_text(text)?;
                Ok(format!("{BROADCAST_PREFIX}{text}"))
            }
            Self::Direct { target, text } => {
                if target.is_empty() || target.contains(':') {
                    return Err(ProtocolError::InvalidTarget(target.clone()));
                }
                reject_line_breaks(target)?;
                check_text(text)?;
                Ok(format!("{DIRECT_PREFIX}{target}:{text}"))
            }
            Self::List => Ok(LIST.to_string()),
        }
    }
}

fn check_text(text: &str) -> Result<(), ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyText);
    }
    reject_line_breaks(text)
}

fn reject_line_breaks(text: &str) -> Result<(), ProtocolError> {
    if text.contains(['\n', '\r']) {
        return Err(ProtocolError::EmbeddedNewline);
    }
    Ok(())
}
