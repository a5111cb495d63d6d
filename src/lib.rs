//! Connection acceptance and stream lifecycle core for a federated XMPP server.

pub mod config;
pub mod diagnostics;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod server;
pub mod transport;

pub use config::schema::ServerConfig;
pub use net::{StreamHandle, StreamId};
pub use routing::{LocalRouter, Router};
pub use server::{DomainServer, ServerRegistry};
