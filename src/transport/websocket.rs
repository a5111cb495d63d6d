//! WebSocket transport (RFC 7395 framing: one text frame per XML fragment).

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::{keep_alive_expired, Transport, TransportKind};

/// Subprotocol token a client must offer during the upgrade.
pub const XMPP_SUBPROTOCOL: &str = "xmpp";

/// Transport over an upgraded WebSocket connection.
pub struct WebSocketTransport {
    socket: WebSocket,
    peer: Option<SocketAddr>,
    keep_alive: Duration,
    /// Frame bytes not yet handed to a reader.
    pending: Vec<u8>,
    closed: bool,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket with the configured keep-alive.
    pub fn new(socket: WebSocket, peer: Option<SocketAddr>, keep_alive: Duration) -> Self {
        Self {
            socket,
            peer,
            keep_alive,
            pending: Vec::new(),
            closed: false,
        }
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("peer", &self.peer)
            .field("keep_alive", &self.keep_alive)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    fn set_keep_alive(&mut self, keep_alive: Duration) {
        self.keep_alive = keep_alive;
    }

    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        async move {
            if !self.pending.is_empty() {
                return Ok(self.drain_pending(buf));
            }
            if self.closed || buf.is_empty() {
                return Ok(0);
            }

            loop {
                let keep_alive = self.keep_alive;
                let frame = tokio::time::timeout(keep_alive, self.socket.recv())
                    .await
                    .map_err(|_| keep_alive_expired(keep_alive))?;

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.pending.extend_from_slice(text.as_str().as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.pending.extend_from_slice(&data);
                    }
                    // Control frames are answered by the socket itself.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        self.closed = true;
                        return Ok(0);
                    }
                    Some(Err(e)) => return Err(io::Error::other(e)),
                }

                if !self.pending.is_empty() {
                    return Ok(self.drain_pending(buf));
                }
            }
        }
        .boxed()
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        async move {
            let text = std::str::from_utf8(data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.socket
                .send(Message::text(text.to_owned()))
                .await
                .map_err(io::Error::other)
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.socket
                .send(Message::Close(None))
                .await
                .map_err(io::Error::other)
        }
        .boxed()
    }
}
