//! Raw TCP transport.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{keep_alive_expired, Transport, TransportKind};

/// Transport over an accepted TCP connection.
#[derive(Debug)]
pub struct SocketTransport {
    stream: TcpStream,
    peer: SocketAddr,
    keep_alive: Duration,
}

impl SocketTransport {
    /// Wrap an accepted connection with the configured keep-alive.
    pub fn new(stream: TcpStream, peer: SocketAddr, keep_alive: Duration) -> Self {
        // Stanzas are small and latency sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        Self {
            stream,
            peer,
            keep_alive,
        }
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    fn set_keep_alive(&mut self, keep_alive: Duration) {
        self.keep_alive = keep_alive;
    }

    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        async move {
            let keep_alive = self.keep_alive;
            match tokio::time::timeout(keep_alive, self.stream.read(buf)).await {
                Ok(result) => result,
                Err(_) => Err(keep_alive_expired(keep_alive)),
            }
        }
        .boxed()
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        async move { self.stream.write_all(data).await }.boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        async move { self.stream.shutdown().await }.boxed()
    }
}
