//! In-process router.
//!
//! Keeps the set of local domains and forwards accepted streams to a single
//! stream processor over a channel.

use dashmap::DashSet;
use tokio::sync::mpsc;

use super::router::{RouteError, Router};
use crate::net::StreamHandle;

/// Router that hands streams to one consumer.
#[derive(Debug)]
pub struct LocalRouter {
    /// Lowercased local domains.
    domains: DashSet<String>,
    streams: mpsc::UnboundedSender<StreamHandle>,
}

impl LocalRouter {
    /// Create a router and the receiving end for the stream processor.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamHandle>) {
        let (streams, rx) = mpsc::unbounded_channel();
        (
            Self {
                domains: DashSet::new(),
                streams,
            },
            rx,
        )
    }

    /// Whether `domain` was registered. Case-insensitive.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.domains.contains(&domain.to_lowercase())
    }

    fn forward(&self, stream: StreamHandle) -> Result<(), RouteError> {
        let domain = &stream.config().domain;
        if !self.is_local_domain(domain) {
            return Err(RouteError::UnknownDomain(domain.clone()));
        }
        self.streams.send(stream).map_err(|_| RouteError::Closed)
    }
}

impl Router for LocalRouter {
    fn register_domain(&self, domain: &str) {
        if self.domains.insert(domain.to_lowercase()) {
            tracing::info!(domain = %domain, "Local domain registered");
        }
    }

    fn register_c2s(&self, stream: StreamHandle) -> Result<(), RouteError> {
        self.forward(stream)
    }

    fn register_s2s(&self, stream: StreamHandle) -> Result<(), RouteError> {
        self.forward(stream)
    }
}
