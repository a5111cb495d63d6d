//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → transport (socket or upgraded WebSocket)
//!     → stream.rs (stream id assignment, handle construction)
//!     → Hand off to the router
//!
//! tls.rs loads the certificate each domain carries: used to terminate TLS
//! for WebSocket listeners and by the stream layer for STARTTLS.
//! ```
//!
//! # Design Decisions
//! - One listener per domain, never shared
//! - Stream ids come from a per-server atomic counter
//! - Missing certificates fall back to a self-signed one per domain

pub mod listener;
pub mod stream;
pub mod tls;

pub use listener::{ListenerError, TransportListener};
pub use stream::{StreamFactory, StreamHandle, StreamId};
pub use tls::{load_certificate, Certificate, TlsError};
