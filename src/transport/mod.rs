//! Byte-stream transports.
//!
//! # Data Flow
//! ```text
//! Accepted TcpStream            Upgraded WebSocket
//!     → socket.rs                   → websocket.rs
//!          \                           /
//!           → Box<dyn Transport> (read / write / close)
//!           → StreamHandle (net::stream)
//! ```
//!
//! # Design Decisions
//! - One object-safe trait for every transport kind; accept loops and the
//!   stream factory never look past it
//! - Keep-alive is an idle read timeout; expiry surfaces as `TimedOut`
//! - Futures are boxed so handles can be moved around as trait objects

pub mod socket;
pub mod websocket;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use socket::SocketTransport;
pub use websocket::{WebSocketTransport, XMPP_SUBPROTOCOL};

/// Wire encoding a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw TCP byte stream.
    #[default]
    Socket,
    /// WebSocket upgraded from HTTP(S), one stanza per text frame.
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Socket => write!(f, "socket"),
            TransportKind::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Uniform capability set over every accepted connection.
pub trait Transport: Send + fmt::Debug {
    /// Encoding of the underlying connection.
    fn kind(&self) -> TransportKind;

    /// Remote address, when the transport knows it.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Idle timeout applied to reads.
    fn keep_alive(&self) -> Duration;

    /// Replace the idle timeout applied to reads.
    fn set_keep_alive(&mut self, keep_alive: Duration);

    /// Read available bytes into `buf`. `Ok(0)` means the peer closed the stream.
    fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Write all of `data`.
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Close the transport. Further reads return `Ok(0)` or an error.
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// Error returned when a read outlives the keep-alive.
pub(crate) fn keep_alive_expired(keep_alive: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no data received for {}s", keep_alive.as_secs()),
    )
}
