//! Stream identity and construction.
//!
//! # Responsibilities
//! - Assign every accepted connection a process-unique stream id
//! - Bind the transport to its domain's immutable configuration
//! - Produce the handle that ownership passes to the router

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{DomainConfig, StreamRole};
use crate::transport::Transport;

/// Identifier of one stream: `{server_id}:{counter}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    server: Arc<str>,
    seq: u64,
}

impl StreamId {
    /// Id of the owning domain server.
    pub fn server_id(&self) -> &str {
        &self.server
    }

    /// Per-server sequence number, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.seq)
    }
}

/// An identified connection, ready for protocol processing.
#[derive(Debug)]
pub struct StreamHandle {
    id: StreamId,
    transport: Box<dyn Transport>,
    config: Arc<DomainConfig>,
}

impl StreamHandle {
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    pub fn role(&self) -> StreamRole {
        self.config.role
    }

    /// Configuration of the domain that accepted the stream.
    pub fn config(&self) -> &Arc<DomainConfig> {
        &self.config
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Split the handle into its parts.
    pub fn into_parts(self) -> (StreamId, Box<dyn Transport>, Arc<DomainConfig>) {
        (self.id, self.transport, self.config)
    }
}

/// Builds stream handles for one domain server.
///
/// The counter is the only state shared between concurrent accepts.
#[derive(Debug)]
pub struct StreamFactory {
    server: Arc<str>,
    counter: AtomicU64,
    config: Arc<DomainConfig>,
}

impl StreamFactory {
    pub fn new(config: Arc<DomainConfig>) -> Self {
        Self {
            server: Arc::from(config.id.as_str()),
            counter: AtomicU64::new(0),
            config,
        }
    }

    /// Reserve the next stream id.
    pub fn next_id(&self) -> StreamId {
        // Relaxed is enough: only uniqueness and per-server monotonicity matter.
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        StreamId {
            server: Arc::clone(&self.server),
            seq,
        }
    }

    /// Wrap a transport into a stream under an id reserved with `next_id`.
    ///
    /// Reserving at accept time keeps ids in accept order even when streams
    /// are built on separate tasks.
    pub fn create(&self, id: StreamId, transport: Box<dyn Transport>) -> StreamHandle {
        StreamHandle {
            id,
            transport,
            config: Arc::clone(&self.config),
        }
    }

    /// Number of ids handed out so far.
    pub fn created(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
