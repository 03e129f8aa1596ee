//! Error types for the protocol layer.

/// Errors that can occur while parsing or building frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The registration frame was empty after trimming whitespace.
    #[error("client identifier cannot be empty")]
    EmptyId,

    /// The registration frame was longer than the server allows.
    #[error("client identifier exceeds {max} bytes")]
    IdTooLong { max: usize },

    /// A message had no text to send.
    #[error("message text cannot be empty")]
    EmptyText,

    /// Frame text contained `\n` or `\r`, which would split it on the wire.
    #[error("frame text contains a line break")]
    EmbeddedNewline,

    /// A direct message named an empty or unaddressable target.
    #[error("invalid direct message target: {0:?}")]
    InvalidTarget(String),

    /// A server frame did not match any known shape.
    #[error("unrecognized frame: {0}")]
    UnrecognizedFrame(String),
}
