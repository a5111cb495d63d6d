//! Server subsystem.
//!
//! # Data Flow
//! ```text
//! ServerRegistry::initialize
//!     → validate every DomainSettings entry
//!     → bind diagnostics (optional)
//!     → DomainServer::start per domain (register domain, bind, accept loop)
//!     → park on the shutdown handshake
//!
//! ServerRegistry::shutdown
//!     → request + ack
//!     → sweep: diagnostics, then every DomainServer::shutdown
//! ```
//!
//! # Design Decisions
//! - The registry is an explicit object owned by the composition root
//! - Any startup failure sweeps what already started and is returned as an error
//! - Listening state is an atomic so shutdown and the accept loop never lock each other

pub mod domain;
pub mod registry;

pub use domain::{DomainServer, ListeningState, ServerError, ServerStatus};
pub use registry::{RegistryError, ServerRegistry};
