//! Diagnostics endpoint.
//!
//! # Responsibilities
//! - Report process and runtime status
//! - List every domain server with its listening state
//! - Expose Prometheus metrics when a recorder is installed
//!
//! # Design Decisions
//! - Bound to loopback only, separate from protocol traffic
//! - Reads the registry table directly, never takes part in its locking
//! - Closed first during a registry sweep, with a bounded grace period

pub mod handlers;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::server::DomainServer;
use handlers::{get_metrics, get_servers, get_status};

/// How long in-flight diagnostics requests get to finish on close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Error binding the diagnostics endpoint.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind diagnostics on {address}: {source}")]
pub struct DiagnosticsError {
    pub address: SocketAddr,
    #[source]
    pub source: io::Error,
}

/// Shared state for diagnostics handlers.
#[derive(Clone)]
pub struct DiagnosticsState {
    pub servers: Arc<DashMap<String, DomainServer>>,
    pub started: Instant,
}

pub fn setup_diagnostics_router(state: DiagnosticsState) -> Router {
    Router::new()
        .route("/debug/status", get(get_status))
        .route("/debug/servers", get(get_servers))
        .route("/debug/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running diagnostics HTTP server.
#[derive(Debug)]
pub struct DiagnosticsServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

impl DiagnosticsServer {
    /// Bind `127.0.0.1:{port}` and start serving.
    pub async fn bind(
        port: u16,
        servers: Arc<DashMap<String, DomainServer>>,
    ) -> Result<Self, DiagnosticsError> {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| DiagnosticsError { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| DiagnosticsError { address, source })?;

        let app = setup_diagnostics_router(DiagnosticsState {
            servers,
            started: Instant::now(),
        });
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(address = %local_addr, "Diagnostics listening");
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for in-flight requests, aborting after the grace period.
    pub async fn close(self) {
        let Self {
            local_addr,
            shutdown,
            mut task,
        } = self;
        let _ = shutdown.send(());

        match tokio::time::timeout(CLOSE_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => tracing::debug!(address = %local_addr, "Diagnostics closed"),
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Diagnostics server failed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Diagnostics task failed"),
            Err(_) => {
                tracing::warn!("Diagnostics did not close in time, aborting");
                task.abort();
            }
        }
    }
}
