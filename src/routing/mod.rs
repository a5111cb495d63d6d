//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! DomainServer::start
//!     → Router::register_domain (once per server)
//!
//! Accepted connection
//!     → StreamHandle
//!     → Router::register_c2s / register_s2s (ownership moves here)
//!     → stream processor (outside this crate)
//! ```
//!
//! # Design Decisions
//! - The router is a trait so the real routing table can live elsewhere
//! - Domains are matched case-insensitively
//! - A refused stream is logged and dropped by the caller

pub mod local;
pub mod router;

pub use local::LocalRouter;
pub use router::{RouteError, Router};
