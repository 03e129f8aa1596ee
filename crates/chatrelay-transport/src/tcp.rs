//! Newline-framed TCP transport.
//!
//! Raw TCP is a byte stream: one `read` may return half a message or two
//! messages glued together. [`LinesCodec`] buffers incoming bytes per
//! connection and only yields complete `\n`-terminated lines, so the layers
//! above always see exactly one message per frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::{Connection, ConnectionId, FrameLimits, Transport, TransportError};

/// A TCP [`Transport`] that frames every connection on line boundaries.
pub struct TcpTransport {
    listener: TcpListener,
    limits: FrameLimits,
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Accepted = TcpConnection;

    async fn bind(
        addr: &str,
        limits: FrameLimits,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            limits,
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&mut self) -> Result<TcpConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = TcpConnection::from_stream(stream, addr, self.limits);
        tracing::debug!(id = %conn.id, %addr, "accepted TCP connection");
        Ok(conn)
    }

    /// Line framing needs no setup; the accepted socket is ready as is.
    async fn establish(accepted: TcpConnection) -> Result<TcpConnection, TransportError> {
        Ok(accepted)
    }
}

/// A single line-framed TCP connection.
///
/// The stream is split so a task blocked in [`recv`](Connection::recv)
/// never holds up writers. Writers queue on the write-half mutex, which
/// keeps each frame contiguous on the wire.
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    limits: FrameLimits,
    reader: Mutex<FramedRead<OwnedReadHalf, LinesCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    closed: CancellationToken,
    closing: AtomicBool,
}

impl TcpConnection {
    /// Wraps an already-connected stream.
    pub fn from_stream(
        stream: TcpStream,
        peer_addr: SocketAddr,
        limits: FrameLimits,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        Self {
            id: ConnectionId::next(),
            peer_addr,
            limits,
            reader: Mutex::new(FramedRead::new(
                read_half,
                LinesCodec::new_with_max_length(limits.inbound),
            )),
            // Outbound length is checked in `send`, before the lock.
            writer: Mutex::new(FramedWrite::new(write_half, LinesCodec::new())),
            closed: CancellationToken::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Opens an outbound connection to a relay server.
    pub async fn connect(
        addr: &str,
        limits: FrameLimits,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionClosed(format!("{addr}: {e}")))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| TransportError::ConnectionClosed(e.to_string()))?;
        Ok(Self::from_stream(stream, peer_addr, limits))
    }

    fn map_codec_error(
        &self,
        err: LinesCodecError,
        wrap: fn(std::io::Error) -> TransportError,
    ) -> TransportError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                TransportError::FrameTooLong(self.limits.inbound)
            }
            LinesCodecError::Io(e) => wrap(e),
        }
    }
}

impl Connection for TcpConnection {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if frame.len() > self.limits.outbound {
            return Err(TransportError::FrameTooLong(self.limits.outbound));
        }

        let closed = || TransportError::ConnectionClosed(format!("{} closed", self.id));
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(closed()),
            writer = self.writer.lock() => writer,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(closed()),
            res = writer.send(frame) => {
                res.map_err(|e| self.map_codec_error(e, TransportError::SendFailed))
            }
        }
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Ok(None),
            reader = self.reader.lock() => reader,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            frame = reader.next() => match frame {
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(e)) => {
                    Err(self.map_codec_error(e, TransportError::ReceiveFailed))
                }
                None => Ok(None),
            },
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Wakes any task parked in recv/send, which releases both locks.
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            tracing::debug!(id = %self.id, error = %e, "shutdown after close");
        }
        tracing::debug!(id = %self.id, "TCP connection closed");
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
