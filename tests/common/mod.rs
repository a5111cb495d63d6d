//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use streamgate::config::schema::{ClientSettings, FederationSettings, TlsSection, TransportSection};
use streamgate::config::DomainSettings;
use streamgate::routing::RouteError;
use streamgate::transport::TransportKind;
use streamgate::{Router, ServerRegistry, StreamHandle};
use tokio::task::JoinHandle;

/// Router that records every call and keeps the streams alive.
#[derive(Default)]
pub struct RecordingRouter {
    pub domains: Mutex<Vec<String>>,
    pub c2s: Mutex<Vec<StreamHandle>>,
    pub s2s: Mutex<Vec<StreamHandle>>,
}

impl RecordingRouter {
    pub fn c2s_ids(&self) -> Vec<String> {
        self.c2s.lock().unwrap().iter().map(|s| s.id().to_string()).collect()
    }

    pub fn s2s_ids(&self) -> Vec<String> {
        self.s2s.lock().unwrap().iter().map(|s| s.id().to_string()).collect()
    }

    /// `(server id, peer port, sequence)` of every registered c2s stream.
    pub fn c2s_peers(&self) -> Vec<(String, u16, u64)> {
        self.c2s
            .lock()
            .unwrap()
            .iter_mut()
            .map(|stream| {
                let port = stream.transport().peer_addr().map_or(0, |peer| peer.port());
                (stream.id().server_id().to_string(), port, stream.id().sequence())
            })
            .collect()
    }

    /// Poll until `count` c2s streams were registered.
    pub async fn wait_c2s(&self, count: usize) -> Vec<String> {
        for _ in 0..300 {
            let ids = self.c2s_ids();
            if ids.len() >= count {
                return ids;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} c2s registrations, got {:?}", self.c2s_ids());
    }
}

impl Router for RecordingRouter {
    fn register_domain(&self, domain: &str) {
        self.domains.lock().unwrap().push(domain.to_string());
    }

    fn register_c2s(&self, stream: StreamHandle) -> Result<(), RouteError> {
        self.c2s.lock().unwrap().push(stream);
        Ok(())
    }

    fn register_s2s(&self, stream: StreamHandle) -> Result<(), RouteError> {
        self.s2s.lock().unwrap().push(stream);
        Ok(())
    }
}

/// Loopback transport section on the given port.
pub fn transport(kind: TransportKind, port: u16) -> TransportSection {
    TransportSection {
        kind,
        bind_addr: "127.0.0.1".to_string(),
        port: Some(port),
        tls: false,
        ..TransportSection::default()
    }
}

pub fn client(id: &str, transport: TransportSection) -> DomainSettings {
    DomainSettings::Client(ClientSettings {
        id: id.to_string(),
        domain: "localhost".to_string(),
        transport,
        tls: TlsSection::default(),
        connect_timeout: None,
        max_stanza_size: None,
    })
}

pub fn federation(settings: FederationSettings) -> DomainSettings {
    DomainSettings::Federation(settings)
}

/// Reserve a loopback port and release it for the code under test.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Build a registry around a fresh recording router.
pub fn registry() -> (Arc<ServerRegistry>, Arc<RecordingRouter>) {
    let router = Arc::new(RecordingRouter::default());
    let registry = Arc::new(ServerRegistry::new(router.clone()));
    (registry, router)
}

/// Run `initialize` on its own task and wait until every server listens.
pub async fn start(
    registry: &Arc<ServerRegistry>,
    domains: Vec<DomainSettings>,
    diagnostics_port: u16,
) -> JoinHandle<Result<(), streamgate::server::RegistryError>> {
    let task = {
        let registry = Arc::clone(registry);
        tokio::spawn(async move { registry.initialize(domains, diagnostics_port).await })
    };
    tokio::time::timeout(Duration::from_secs(5), registry.wait_running())
        .await
        .expect("registry did not start");
    task
}
