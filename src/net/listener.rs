//! TCP listener for one domain.
//!
//! # Responsibilities
//! - Bind to the domain's configured address
//! - Accept incoming TCP connections
//! - Hand the bound socket to the HTTP server for WebSocket domains

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

use crate::config::TransportSettings;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind { address: String, source: std::io::Error },
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind { address, source } => write!(f, "Failed to bind {}: {}", address, source),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } => Some(source),
            ListenerError::Accept(e) => Some(e),
        }
    }
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct TransportListener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl TransportListener {
    /// Bind to the configured address and port.
    pub async fn bind(settings: &TransportSettings) -> Result<Self, ListenerError> {
        Self::bind_addr(&settings.bind_address, settings.port).await
    }

    /// Bind to `host:port`. Host names are resolved.
    pub async fn bind_addr(host: &str, port: u16) -> Result<Self, ListenerError> {
        let address = format!("{}:{}", host, port);
        let bind_err = |source| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let inner = TcpListener::bind((host, port)).await.map_err(bind_err)?;
        let local_addr = inner.local_addr().map_err(bind_err)?;

        tracing::debug!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::trace!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Convert into a non-blocking std listener for hyper-based servers.
    pub fn into_std(self) -> Result<std::net::TcpListener, ListenerError> {
        let address = self.local_addr.to_string();
        self.inner
            .into_std()
            .map_err(|source| ListenerError::Bind { address, source })
    }
}
