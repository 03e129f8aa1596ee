//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! WebSocket already delimits messages, so each text message is one frame.
//! Frames still have to be single lines: they are relayed verbatim to TCP
//! peers, where a line break would split them in two.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::{Connection, ConnectionId, FrameLimits, Transport, TransportError};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    limits: FrameLimits,
}

/// A TCP socket accepted by [`WebSocketTransport`] whose HTTP upgrade has
/// not run yet.
pub struct PendingWebSocket {
    stream: TcpStream,
    peer_addr: SocketAddr,
    limits: FrameLimits,
}

impl PendingWebSocket {
    /// The remote address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Accepted = PendingWebSocket;

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
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener, limits })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    async fn accept(&mut self) -> Result<PendingWebSocket, TransportError> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        Ok(PendingWebSocket {
            stream,
            peer_addr,
            limits: self.limits,
        })
    }

    async fn establish(
        pending: PendingWebSocket,
    ) -> Result<WebSocketConnection, TransportError> {
        let PendingWebSocket {
            stream,
            peer_addr,
            limits,
        } = pending;
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| {
                TransportError::HandshakeFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let id = ConnectionId::next();
        tracing::debug!(%id, %peer_addr, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            peer_addr,
            limits,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
            closing: AtomicBool::new(false),
        })
    }
}

/// A single WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    limits: FrameLimits,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: CancellationToken,
    closing: AtomicBool,
}

impl WebSocketConnection {
    fn check_frame(&self, text: String) -> Result<String, TransportError> {
        if text.len() > self.limits.inbound {
            return Err(TransportError::FrameTooLong(self.limits.inbound));
        }
        if text.contains(['\n', '\r']) {
            return Err(TransportError::ReceiveFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame contains a line break",
            )));
        }
        Ok(text)
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed(format!(
                "{} closed",
                self.id
            )));
        }
        if frame.len() > self.limits.outbound {
            return Err(TransportError::FrameTooLong(self.limits.outbound));
        }
        let msg = Message::text(frame.to_owned());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        let mut stream = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Ok(None),
            stream = self.stream.lock() => stream,
        };
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Ok(None),
                msg = stream.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return self.check_frame(text.as_str().to_owned()).map(Some);
                }
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8(data.to_vec()).map_err(|e| {
                        TransportError::ReceiveFailed(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            e,
                        ))
                    })?;
                    return self.check_frame(text).map(Some);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(id = %self.id, error = %e, "close handshake failed");
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}
