//! Process-wide table of domain servers.
//!
//! # State Machine
//! ```text
//! Idle ──initialize──▶ Starting ──all listening──▶ Running
//!                          │                          │ shutdown request
//!                          │ fatal error              ▼
//!                          └──────────────────────▶ Sweeping ──▶ Idle
//! ```
//!
//! `initialize` owns the whole incarnation: it starts everything, parks on
//! the shutdown handshake, sweeps, and only then returns.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::watch;

use super::domain::{DomainServer, ServerError, ServerStatus};
use crate::config::{DomainConfig, DomainSettings, FederationConfig, StreamRole, ValidationError};
use crate::diagnostics::{DiagnosticsError, DiagnosticsServer};
use crate::lifecycle::{handshake, ShutdownTrigger};
use crate::routing::Router;

/// Fatal registry error. Returned by `initialize` after the sweep.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),
}

/// Registry of every domain server in the process.
pub struct ServerRegistry {
    router: Arc<dyn Router>,
    initialized: AtomicBool,
    servers: Arc<DashMap<String, DomainServer>>,
    trigger: Mutex<Option<ShutdownTrigger>>,
    running: watch::Sender<bool>,
}

impl ServerRegistry {
    pub fn new(router: Arc<dyn Router>) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            router,
            initialized: AtomicBool::new(false),
            servers: Arc::new(DashMap::new()),
            trigger: Mutex::new(None),
            running,
        }
    }

    /// Start every enabled domain and block until shutdown.
    ///
    /// A second call while initialized returns `Ok(())` at once. On a fatal
    /// error everything already started is swept before the error is returned.
    pub async fn initialize(
        &self,
        domains: Vec<DomainSettings>,
        diagnostics_port: u16,
    ) -> Result<(), RegistryError> {
        let (trigger, mut listener) = handshake();
        {
            // Flag and trigger change together so `shutdown` never sees one without the other.
            let mut slot = self.lock_trigger();
            if self
                .initialized
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::debug!("Registry already initialized");
                return Ok(());
            }
            *slot = Some(trigger);
        }

        let mut diagnostics = None;
        let started = self
            .start_all(domains, diagnostics_port, &mut diagnostics)
            .await;

        let first = if started.is_ok() {
            self.running.send_replace(true);
            tracing::info!(servers = self.servers.len(), "Registry running");
            listener.recv().await
        } else {
            None
        };
        if let Err(e) = &started {
            tracing::error!(error = %e, "Registry failed to start");
        }

        self.sweep(diagnostics).await;
        {
            let mut slot = self.lock_trigger();
            *slot = None;
            self.initialized.store(false, Ordering::SeqCst);
        }
        self.running.send_replace(false);
        listener.acknowledge_all(first).await;

        tracing::info!("Registry stopped");
        started
    }

    async fn start_all(
        &self,
        domains: Vec<DomainSettings>,
        diagnostics_port: u16,
        diagnostics: &mut Option<DiagnosticsServer>,
    ) -> Result<(), RegistryError> {
        let configs = build_configs(domains)?;

        if diagnostics_port > 0 {
            *diagnostics =
                Some(DiagnosticsServer::bind(diagnostics_port, Arc::clone(&self.servers)).await?);
        }

        for config in configs {
            let server = DomainServer::new(config, Arc::clone(&self.router));
            self.servers.insert(server.id().to_string(), server.clone());
            server.start().await?;
        }
        Ok(())
    }

    /// Close diagnostics, stop every server, and empty the table.
    async fn sweep(&self, diagnostics: Option<DiagnosticsServer>) {
        if let Some(diagnostics) = diagnostics {
            diagnostics.close().await;
        }

        let servers: Vec<DomainServer> = self
            .servers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let results = join_all(servers.iter().map(|server| server.shutdown())).await;
        for (server, result) in servers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(server = %server.id(), error = %e, "Server shutdown failed");
            }
        }
        self.servers.clear();
    }

    /// Request shutdown and wait for the sweep to finish.
    ///
    /// Returns at once if the registry is not initialized.
    pub async fn shutdown(&self) {
        let trigger = self.lock_trigger().clone();
        let Some(trigger) = trigger else {
            tracing::debug!("Shutdown requested, registry not initialized");
            return;
        };

        tracing::info!("Shutdown requested");
        if !trigger.request().await {
            tracing::debug!("Registry already swept");
        }
    }

    /// Wait until the current incarnation has every server listening.
    ///
    /// Returns `false` if the registry is dropped first.
    pub async fn wait_running(&self) -> bool {
        let mut running = self.running.subscribe();
        // Bound to a local so the borrow guard drops before `running`.
        let ready = running.wait_for(|running| *running).await.is_ok();
        ready
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn server(&self, id: &str) -> Option<DomainServer> {
        self.servers.get(id).map(|entry| entry.value().clone())
    }

    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.servers.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        let mut statuses: Vec<ServerStatus> = self
            .servers
            .iter()
            .map(|entry| entry.value().status())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    fn lock_trigger(&self) -> std::sync::MutexGuard<'_, Option<ShutdownTrigger>> {
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("initialized", &self.is_initialized())
            .field("servers", &self.server_ids())
            .finish()
    }
}

/// Validate every entry before anything binds. Disabled federation is skipped.
fn build_configs(domains: Vec<DomainSettings>) -> Result<Vec<Arc<DomainConfig>>, ValidationError> {
    let mut ids = HashSet::new();
    let mut configs = Vec::with_capacity(domains.len());

    for domain in domains {
        let config = match domain {
            DomainSettings::Client(settings) => DomainConfig::client(&settings)?,
            DomainSettings::Federation(settings) => {
                let Some(federation) = FederationConfig::from_settings(&settings)? else {
                    tracing::info!(server = %settings.id, "Federation disabled, skipping");
                    continue;
                };
                if settings.id.is_empty() {
                    return Err(ValidationError::MissingServerId {
                        role: StreamRole::Server,
                    });
                }
                DomainConfig::federation(&settings.id, federation)
            }
        };
        if !ids.insert(config.id.clone()) {
            return Err(ValidationError::DuplicateServerId(config.id));
        }
        configs.push(Arc::new(config));
    }
    Ok(configs)
}
