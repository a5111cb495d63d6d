//! Domain server: one listening endpoint turning connections into streams.
//!
//! # State Machine
//! ```text
//! Stopped ──start (bind ok)──▶ Listening ──shutdown (CAS winner)──▶ Stopped
//! ```
//!
//! `Listening` is published under the same lock as the close handle, so a
//! concurrent `shutdown` either sees `Stopped` (nothing to close) or finds
//! the handle it has to close.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tower_http::trace::TraceLayer;

use crate::config::{DomainConfig, StreamRole};
use crate::net::{ListenerError, StreamFactory, StreamId, TransportListener};
use crate::observability::metrics;
use crate::routing::Router;
use crate::transport::{SocketTransport, Transport, TransportKind, WebSocketTransport, XMPP_SUBPROTOCOL};

/// Listening state of a domain server.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningState {
    Stopped = 0,
    Listening = 1,
}

impl From<u8> for ListeningState {
    fn from(val: u8) -> Self {
        match val {
            1 => ListeningState::Listening,
            _ => ListeningState::Stopped,
        }
    }
}

/// Error type for domain server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{id}: {source}")]
    Bind {
        id: String,
        #[source]
        source: ListenerError,
    },

    #[error("{id}: already listening")]
    AlreadyStarted { id: String },

    #[error("{id}: failed to close listener: {source}")]
    Close {
        id: String,
        #[source]
        source: io::Error,
    },
}

/// Point-in-time view of a domain server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub domain: String,
    pub role: String,
    pub transport: TransportKind,
    pub state: ListeningState,
    pub local_addr: Option<SocketAddr>,
    pub streams_created: u64,
}

enum Running {
    Socket {
        close: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    WebSocket {
        handle: axum_server::Handle,
        task: JoinHandle<io::Result<()>>,
    },
}

struct Active {
    local_addr: SocketAddr,
    running: Running,
}

struct Inner {
    config: Arc<DomainConfig>,
    factory: StreamFactory,
    router: Arc<dyn Router>,
    state: AtomicU8,
    active: Mutex<Option<Active>>,
    upgrades: UpgradeTracker,
}

/// Counts WebSocket upgrades that may still produce a stream.
///
/// An upgrade is tracked from the moment the handler accepts it until its
/// stream has been handed to the router, so shutdown can wait for it.
#[derive(Debug, Clone)]
struct UpgradeTracker {
    in_flight: Arc<watch::Sender<usize>>,
}

impl UpgradeTracker {
    fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            in_flight: Arc::new(in_flight),
        }
    }

    fn track(&self) -> UpgradeGuard {
        self.in_flight.send_modify(|count| *count += 1);
        UpgradeGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Wait until every tracked upgrade has finished.
    async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.subscribe();
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
struct UpgradeGuard {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for UpgradeGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|count| *count -= 1);
    }
}

/// Owns one listener and the stream factory for one configured domain.
#[derive(Clone)]
pub struct DomainServer {
    inner: Arc<Inner>,
}

impl DomainServer {
    pub fn new(config: Arc<DomainConfig>, router: Arc<dyn Router>) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory: StreamFactory::new(Arc::clone(&config)),
                config,
                router,
                state: AtomicU8::new(ListeningState::Stopped as u8),
                active: Mutex::new(None),
                upgrades: UpgradeTracker::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn domain(&self) -> &str {
        &self.inner.config.domain
    }

    pub fn config(&self) -> &Arc<DomainConfig> {
        &self.inner.config
    }

    pub fn state(&self) -> ListeningState {
        self.inner.state()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListeningState::Listening
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock_active().as_ref().map(|active| active.local_addr)
    }

    /// Number of stream ids handed out so far.
    pub fn streams_created(&self) -> u64 {
        self.inner.factory.created()
    }

    pub fn status(&self) -> ServerStatus {
        let config = &self.inner.config;
        ServerStatus {
            id: config.id.clone(),
            domain: config.domain.clone(),
            role: config.role.to_string(),
            transport: config.transport.kind,
            state: self.state(),
            local_addr: self.local_addr(),
            streams_created: self.streams_created(),
        }
    }

    /// Register the domain, bind, and spawn the accept loop.
    ///
    /// Returns once the server is listening; accepting runs on its own task.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let config = Arc::clone(&self.inner.config);
        self.inner.router.register_domain(&config.domain);

        let listener = TransportListener::bind(&config.transport)
            .await
            .map_err(|source| ServerError::Bind {
                id: config.id.clone(),
                source,
            })?;
        let local_addr = listener.local_addr();

        match config.transport.kind {
            TransportKind::Socket => self.listen_socket(listener)?,
            TransportKind::WebSocket => self.listen_websocket(listener)?,
        }

        tracing::info!(
            server = %config.id,
            domain = %config.domain,
            role = %config.role,
            transport = %config.transport.kind,
            address = %local_addr,
            "Listening"
        );
        Ok(local_addr)
    }

    fn listen_socket(&self, listener: TransportListener) -> Result<(), ServerError> {
        let (close, close_rx) = oneshot::channel();
        let local_addr = listener.local_addr();
        self.publish(local_addr, move |inner| Running::Socket {
            close,
            task: tokio::spawn(accept_loop(inner, listener, close_rx)),
        })
    }

    fn listen_websocket(&self, listener: TransportListener) -> Result<(), ServerError> {
        let config = Arc::clone(&self.inner.config);
        let local_addr = listener.local_addr();
        let std_listener = listener.into_std().map_err(|source| ServerError::Bind {
            id: config.id.clone(),
            source,
        })?;
        let tls = config
            .transport
            .tls
            .then(|| RustlsConfig::from_config(config.certificate.server_config()));

        if tls.is_none() {
            tracing::warn!(server = %config.id, "WebSocket listener serving without TLS");
        }

        let handle = axum_server::Handle::new();
        self.publish(local_addr, move |inner| {
            let app = websocket_router(inner).into_make_service_with_connect_info::<SocketAddr>();
            let server_handle = handle.clone();
            let task = match tls {
                Some(tls) => tokio::spawn(
                    axum_server::from_tcp_rustls(std_listener, tls)
                        .handle(server_handle)
                        .serve(app),
                ),
                None => tokio::spawn(
                    axum_server::from_tcp(std_listener)
                        .handle(server_handle)
                        .serve(app),
                ),
            };
            Running::WebSocket { handle, task }
        })
    }

    /// Flip to `Listening` and start the accept task under one lock.
    fn publish(
        &self,
        local_addr: SocketAddr,
        spawn: impl FnOnce(Arc<Inner>) -> Running,
    ) -> Result<(), ServerError> {
        let mut active = self.inner.lock_active();
        if active.is_some() {
            return Err(ServerError::AlreadyStarted {
                id: self.inner.config.id.clone(),
            });
        }
        self.inner
            .state
            .store(ListeningState::Listening as u8, Ordering::SeqCst);
        *active = Some(Active {
            local_addr,
            running: spawn(Arc::clone(&self.inner)),
        });
        metrics::set_listening(&self.inner.config.id, true);
        Ok(())
    }

    /// Stop listening. Safe to call any number of times.
    ///
    /// Only the call that moves the server out of `Listening` closes the
    /// listener. It returns once the accept task has ended and every stream
    /// it let in has reached the router.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let won = self
            .inner
            .state
            .compare_exchange(
                ListeningState::Listening as u8,
                ListeningState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if !won {
            return Ok(());
        }

        let id = self.inner.config.id.clone();
        metrics::set_listening(&id, false);

        let Some(active) = self.inner.lock_active().take() else {
            return Ok(());
        };

        let result = match active.running {
            Running::Socket { close, task } => {
                let _ = close.send(());
                task.await.map_err(io::Error::other)
            }
            Running::WebSocket { handle, task } => {
                handle.shutdown();
                let served = task.await.map_err(io::Error::other).and_then(|served| served);
                self.inner.upgrades.wait_idle().await;
                served
            }
        };

        tracing::info!(server = %id, address = %active.local_addr, "Stopped listening");
        result.map_err(|source| ServerError::Close { id, source })
    }
}

impl std::fmt::Debug for DomainServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainServer")
            .field("id", &self.id())
            .field("domain", &self.domain())
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> ListeningState {
        ListeningState::from(self.state.load(Ordering::SeqCst))
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the stream `id` around `transport` and hand it to the router.
    fn start_stream(&self, id: StreamId, transport: Box<dyn Transport>) {
        let server = &self.config.id;
        let peer = transport.peer_addr();
        if self.state() != ListeningState::Listening {
            tracing::debug!(server = %server, stream_id = %id, peer = ?peer, "Server stopped, dropping connection");
            return;
        }

        let stream = self.factory.create(id, transport);
        let stream_id = stream.id().clone();
        metrics::record_stream_accepted(server);

        let registered = match stream.role() {
            StreamRole::Client => self.router.register_c2s(stream),
            StreamRole::Server => self.router.register_s2s(stream),
        };
        match registered {
            Ok(()) => tracing::debug!(server = %server, stream_id = %stream_id, peer = ?peer, "Stream registered"),
            Err(e) => {
                tracing::warn!(server = %server, stream_id = %stream_id, error = %e, "Stream registration failed");
                metrics::record_registration_failure(server);
            }
        }
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TransportListener, mut close: oneshot::Receiver<()>) {
    let server = inner.config.id.clone();
    let keep_alive = inner.config.transport.keep_alive;
    let mut streams = JoinSet::new();

    while inner.state() == ListeningState::Listening {
        tokio::select! {
            biased;

            _ = &mut close => break,

            Some(_) = streams.join_next(), if !streams.is_empty() => {}

            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    // Ids follow accept order; construction runs off the loop.
                    let id = inner.factory.next_id();
                    let transport = SocketTransport::new(socket, peer, keep_alive);
                    let inner = Arc::clone(&inner);
                    streams.spawn(async move { inner.start_stream(id, Box::new(transport)) });
                }
                Err(e) => {
                    if inner.state() != ListeningState::Listening {
                        break;
                    }
                    tracing::warn!(server = %server, error = %e, "Accept failed");
                    metrics::record_accept_error(&server);
                }
            },
        }
    }

    drop(listener);
    while streams.join_next().await.is_some() {}
    tracing::debug!(server = %server, "Accept loop finished");
}

fn websocket_router(inner: Arc<Inner>) -> axum::Router {
    let path = inner.config.transport.url_path.clone();
    axum::Router::new()
        .route(&path, get(websocket_upgrade))
        .with_state(inner)
        .layer(TraceLayer::new_for_http())
}

/// Whether the upgrade request offers `protocol` in `Sec-WebSocket-Protocol`.
fn offers_subprotocol(headers: &HeaderMap, protocol: &str) -> bool {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim() == protocol)
}

async fn websocket_upgrade(
    State(server): State<Arc<Inner>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let id = server.config.id.clone();
    if !offers_subprotocol(&headers, XMPP_SUBPROTOCOL) {
        tracing::debug!(server = %id, peer = %peer, "Upgrade without xmpp subprotocol rejected");
        metrics::record_upgrade_rejected(&id);
        return (StatusCode::BAD_REQUEST, "missing xmpp subprotocol").into_response();
    }

    let upgrade = server.upgrades.track();
    if server.state() != ListeningState::Listening {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let keep_alive = server.config.transport.keep_alive;
    ws.protocols([XMPP_SUBPROTOCOL])
        .on_failed_upgrade(move |e| {
            tracing::warn!(server = %id, peer = %peer, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            let id = server.factory.next_id();
            server.start_stream(id, Box::new(WebSocketTransport::new(socket, Some(peer), keep_alive)));
            drop(upgrade);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClientSettings, FederationSettings, TlsSection, TransportSection};
    use crate::config::FederationConfig;
    use crate::net::StreamHandle;
    use crate::routing::RouteError;
    use std::time::Duration;
    use tokio::net::TcpStream;

    #[derive(Default)]
    struct RecordingRouter {
        domains: Mutex<Vec<String>>,
        c2s: Mutex<Vec<String>>,
        s2s: Mutex<Vec<String>>,
    }

    impl Router for RecordingRouter {
        fn register_domain(&self, domain: &str) {
            self.domains.lock().unwrap().push(domain.to_string());
        }

        fn register_c2s(&self, stream: StreamHandle) -> Result<(), RouteError> {
            self.c2s.lock().unwrap().push(stream.id().to_string());
            Ok(())
        }

        fn register_s2s(&self, stream: StreamHandle) -> Result<(), RouteError> {
            self.s2s.lock().unwrap().push(stream.id().to_string());
            Ok(())
        }
    }

    fn client_config(id: &str) -> Arc<DomainConfig> {
        let settings = ClientSettings {
            id: id.to_string(),
            domain: "localhost".to_string(),
            transport: TransportSection {
                bind_addr: "127.0.0.1".to_string(),
                port: Some(0),
                ..TransportSection::default()
            },
            tls: TlsSection::default(),
            connect_timeout: None,
            max_stanza_size: None,
        };
        Arc::new(DomainConfig::client(&settings).unwrap())
    }

    async fn wait_for(records: &Mutex<Vec<String>>, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let current = records.lock().unwrap().clone();
            if current.len() >= count {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} registrations");
    }

    #[tokio::test]
    async fn accepted_connections_become_sequential_streams() {
        let router = Arc::new(RecordingRouter::default());
        let server = DomainServer::new(client_config("default"), router.clone());

        let addr = server.start().await.unwrap();
        assert!(server.is_listening());
        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(*router.domains.lock().unwrap(), vec!["localhost".to_string()]);

        let _first = TcpStream::connect(addr).await.unwrap();
        assert_eq!(wait_for(&router.c2s, 1).await, vec!["default:1".to_string()]);

        let _second = TcpStream::connect(addr).await.unwrap();
        assert_eq!(
            wait_for(&router.c2s, 2).await,
            vec!["default:1".to_string(), "default:2".to_string()]
        );
        assert_eq!(server.streams_created(), 2);

        server.shutdown().await.unwrap();
        assert_eq!(server.state(), ListeningState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let server = DomainServer::new(client_config("idem"), Arc::new(RecordingRouter::default()));
        server.shutdown().await.unwrap();

        server.start().await.unwrap();
        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
        assert!(!server.is_listening());
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn concurrent_shutdowns_close_once() {
        let server = DomainServer::new(client_config("race"), Arc::new(RecordingRouter::default()));
        server.start().await.unwrap();

        let (a, b) = tokio::join!(server.shutdown(), server.shutdown());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(server.state(), ListeningState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let server = DomainServer::new(client_config("twice"), Arc::new(RecordingRouter::default()));
        server.start().await.unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyStarted { .. }));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_leaves_server_stopped() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let settings = ClientSettings {
            id: "busy".to_string(),
            domain: "localhost".to_string(),
            transport: TransportSection {
                bind_addr: "127.0.0.1".to_string(),
                port: Some(port),
                ..TransportSection::default()
            },
            tls: TlsSection::default(),
            connect_timeout: None,
            max_stanza_size: None,
        };
        let config = Arc::new(DomainConfig::client(&settings).unwrap());
        let server = DomainServer::new(config, Arc::new(RecordingRouter::default()));

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert_eq!(server.state(), ListeningState::Stopped);
    }

    #[tokio::test]
    async fn federation_streams_go_to_s2s() {
        let settings = FederationSettings {
            dialback_secret: "secret".to_string(),
            local_domain: "example.org".to_string(),
            transport: TransportSection {
                bind_addr: "127.0.0.1".to_string(),
                port: Some(0),
                ..TransportSection::default()
            },
            ..FederationSettings::default()
        };
        let federation = FederationConfig::from_settings(&settings).unwrap().unwrap();
        let config = Arc::new(DomainConfig::federation("s2s", federation));

        let router = Arc::new(RecordingRouter::default());
        let server = DomainServer::new(config, router.clone());
        let addr = server.start().await.unwrap();

        let _peer = TcpStream::connect(addr).await.unwrap();
        assert_eq!(wait_for(&router.s2s, 1).await, vec!["s2s:1".to_string()]);
        assert!(router.c2s.lock().unwrap().is_empty());

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn upgrade_tracker_waits_for_guards() {
        let tracker = UpgradeTracker::new();
        tracker.wait_idle().await;

        let first = tracker.track();
        let second = tracker.track();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("idle once every guard is gone")
            .unwrap();
    }

    #[test]
    fn subprotocol_detection() {
        let mut headers = HeaderMap::new();
        assert!(!offers_subprotocol(&headers, XMPP_SUBPROTOCOL));

        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, "chat, xmpp".parse().unwrap());
        assert!(offers_subprotocol(&headers, XMPP_SUBPROTOCOL));

        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, "xmpp-over-something".parse().unwrap());
        assert!(!offers_subprotocol(&headers, XMPP_SUBPROTOCOL));
    }
}
