//! A minimal peer for talking to a relay over TCP.
//!
//! Used by the demo client and the integration tests. It registers on
//! connect and otherwise just maps [`ClientFrame`]s and [`ServerFrame`]s to
//! wire lines.

use chatrelay_protocol::{ClientFrame, ServerFrame};
use chatrelay_transport::{Connection, TcpConnection};

use crate::{RelayConfig, RelayError};

/// A registered connection to a relay server.
///
/// The server never confirms a registration. A refused identifier shows up
/// as an [`ServerFrame::Error`] on the first [`recv`](Self::recv), followed
/// by the end of the stream.
pub struct RelayClient {
    id: String,
    conn: TcpConnection,
}

impl RelayClient {
    /// Connects to `addr`, a server running the default configuration,
    /// and registers as `id`.
    pub async fn connect(addr: &str, id: &str) -> Result<Self, RelayError> {
        Self::connect_with(addr, id, &RelayConfig::default()).await
    }

    /// Connects to `addr` and registers as `id`, sizing frames for a
    /// server that runs `config`.
    ///
    /// Only the length settings of `config` are used; its `bind_addr` is
    /// ignored.
    pub async fn connect_with(
        addr: &str,
        id: &str,
        config: &RelayConfig,
    ) -> Result<Self, RelayError> {
        let line = ClientFrame::Register(id.to_string()).encode()?;
        let conn = TcpConnection::connect(addr, config.client_frame_limits()).await?;
        conn.send(&line).await?;
        tracing::debug!(%addr, id, "registered with relay");
        Ok(Self {
            id: id.trim().to_string(),
            conn,
        })
    }

    /// The identifier this client registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends one frame.
    pub async fn send(&self, frame: &ClientFrame) -> Result<(), RelayError> {
        let line = frame.encode()?;
        self.conn.send(&line).await?;
        Ok(())
    }

    /// Sends `text` to every other peer.
    pub async fn broadcast(&self, text: &str) -> Result<(), RelayError> {
        self.send(&ClientFrame::Broadcast(text.to_string())).await
    }

    /// Sends `text` to `target` only.
    pub async fn direct(&self, target: &str, text: &str) -> Result<(), RelayError> {
        self.send(&ClientFrame::Direct {
            target: target.to_string(),
            text: text.to_string(),
        })
        .await
    }

    /// Asks for the directory of registered identifiers.
    pub async fn list(&self) -> Result<(), RelayError> {
        self.send(&ClientFrame::List).await
    }

    /// Sends a raw line, bypassing frame validation.
    pub async fn send_raw(&self, line: &str) -> Result<(), RelayError> {
        self.conn.send(line).await?;
        Ok(())
    }

    /// Waits for the next frame from the server. `Ok(None)` means the
    /// server closed the connection.
    pub async fn recv(&self) -> Result<Option<ServerFrame>, RelayError> {
        match self.conn.recv().await? {
            Some(line) => Ok(Some(ServerFrame::parse(&line)?)),
            None => Ok(None),
        }
    }

    /// Closes the connection. The server treats this as leaving.
    pub async fn close(&self) -> Result<(), RelayError> {
        self.conn.close().await?;
        Ok(())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("id", &self.id)
            .field("conn", &self.conn.id())
            .finish()
    }
}
