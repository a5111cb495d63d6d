//! Routing collaborator contract.
//!
//! # Responsibilities
//! - Learn which domains this process serves
//! - Take ownership of every accepted stream
//!
//! # Design Decisions
//! - Registration is synchronous; a router that needs I/O queues internally
//! - A rejected stream is dropped by the caller, never retried

use crate::net::StreamHandle;

/// Error returned when the router refuses a stream.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The stream belongs to a domain this router does not serve.
    #[error("domain {0:?} is not served by this router")]
    UnknownDomain(String),

    /// The stream processor is gone.
    #[error("stream processor closed")]
    Closed,
}

/// Destination for accepted streams.
pub trait Router: Send + Sync + 'static {
    /// Mark `domain` as served locally. Idempotent.
    fn register_domain(&self, domain: &str);

    /// Take ownership of a client-to-server stream.
    fn register_c2s(&self, stream: StreamHandle) -> Result<(), RouteError>;

    /// Take ownership of a server-to-server stream.
    fn register_s2s(&self, stream: StreamHandle) -> Result<(), RouteError>;
}
