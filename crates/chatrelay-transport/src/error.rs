/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer's outbound queue was full, so the frame was dropped.
    #[error("outbound queue full ({0} frames)")]
    QueueFull(usize),

    /// A frame exceeded the configured maximum length.
    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),

    /// Binding the listening socket failed.
    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A connection was accepted but its protocol upgrade failed. Only
    /// that connection is affected.
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[source] std::io::Error),
}
