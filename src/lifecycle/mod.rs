//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     caller → ShutdownTrigger::request (blocks)
//!     → ServerRegistry sweep (diagnostics, then every domain server)
//!     → ShutdownListener::acknowledge_all → caller resumes
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main → ServerRegistry::shutdown
//! ```
//!
//! # Design Decisions
//! - Request/acknowledge handshake, no polling
//! - One sweep per registry incarnation; late requests never hang

pub mod shutdown;
pub mod signals;

pub use shutdown::{handshake, ShutdownListener, ShutdownTrigger};
