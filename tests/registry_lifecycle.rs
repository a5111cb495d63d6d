//! Registry start, stream hand-off, and shutdown.

use std::collections::HashMap;
use std::time::Duration;

use streamgate::config::schema::FederationSettings;
use streamgate::config::ValidationError;
use streamgate::server::{ListeningState, RegistryError, ServerError};
use streamgate::transport::TransportKind;
use tokio::net::TcpStream;

mod common;

use common::{client, federation, free_port, registry, start, transport};

#[tokio::test]
async fn raw_socket_connection_becomes_first_stream() {
    let (registry, router) = registry();
    let task = start(&registry, vec![client("default", transport(TransportKind::Socket, 0))], 0).await;

    let server = registry.server("default").unwrap();
    assert_eq!(server.state(), ListeningState::Listening);
    let addr = server.local_addr().unwrap();
    assert_eq!(*router.domains.lock().unwrap(), vec!["localhost".to_string()]);

    let _client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(router.wait_c2s(1).await, vec!["default:1".to_string()]);

    registry.shutdown().await;
    task.await.unwrap().unwrap();
    assert_eq!(server.state(), ListeningState::Stopped);
    assert_eq!(router.c2s_ids().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn stream_ids_follow_accept_order() {
    let (registry, router) = registry();
    let task = start(
        &registry,
        vec![
            client("a", transport(TransportKind::Socket, 0)),
            client("b", transport(TransportKind::Socket, 0)),
        ],
        0,
    )
    .await;

    let a = registry.server("a").unwrap().local_addr().unwrap();
    let b = registry.server("b").unwrap().local_addr().unwrap();

    let mut clients = Vec::new();
    let mut ports = Vec::new();
    for _ in 0..200 {
        let client = TcpStream::connect(a).await.unwrap();
        ports.push(client.local_addr().unwrap().port());
        clients.push(client);
    }
    clients.push(TcpStream::connect(b).await.unwrap());
    router.wait_c2s(201).await;

    let peers = router.c2s_peers();
    let by_port: HashMap<u16, u64> = peers
        .iter()
        .filter(|(server, _, _)| server == "a")
        .map(|(_, port, seq)| (*port, *seq))
        .collect();
    let sequences: Vec<u64> = ports.iter().map(|port| by_port[port]).collect();
    assert_eq!(sequences, (1..=200).collect::<Vec<u64>>());

    let b_sequences: Vec<u64> = peers
        .iter()
        .filter(|(server, _, _)| server == "b")
        .map(|(_, _, seq)| *seq)
        .collect();
    assert_eq!(b_sequences, vec![1]);

    registry.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_stops_every_listener() {
    let (registry, _router) = registry();
    let task = start(
        &registry,
        vec![
            client("a", transport(TransportKind::Socket, 0)),
            client("b", transport(TransportKind::WebSocket, 0)),
        ],
        0,
    )
    .await;

    let addrs: Vec<_> = registry
        .statuses()
        .iter()
        .map(|status| status.local_addr.unwrap())
        .collect();
    assert_eq!(addrs.len(), 2);

    registry.shutdown().await;
    task.await.unwrap().unwrap();

    assert!(!registry.is_initialized());
    assert!(registry.server_ids().is_empty());
    for addr in addrs {
        assert!(TcpStream::connect(addr).await.is_err());
    }
}

#[tokio::test]
async fn all_domains_disabled_shuts_down() {
    let (registry, _router) = registry();
    let disabled = federation(FederationSettings {
        disabled: true,
        ..FederationSettings::default()
    });
    let task = start(&registry, vec![disabled], 0).await;
    assert!(registry.server_ids().is_empty());

    tokio::time::timeout(Duration::from_secs(5), registry.shutdown())
        .await
        .expect("shutdown must not hang");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_without_initialize_returns() {
    let (registry, _router) = registry();
    tokio::time::timeout(Duration::from_secs(1), registry.shutdown())
        .await
        .expect("shutdown must not hang");
}

#[tokio::test]
async fn concurrent_shutdowns_all_return() {
    let (registry, _router) = registry();
    let task = start(&registry, vec![client("default", transport(TransportKind::Socket, 0))], 0).await;

    let (a, b) = (registry.clone(), registry.clone());
    let first = tokio::spawn(async move { a.shutdown().await });
    let second = tokio::spawn(async move { b.shutdown().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        first.await.unwrap();
        second.await.unwrap();
    })
    .await
    .expect("every shutdown caller returns");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_dialback_secret_binds_nothing() {
    let (registry, router) = registry();
    let port = free_port();
    let s2s = federation(FederationSettings {
        dial_timeout: Some(5),
        local_domain: "example.org".to_string(),
        transport: transport(TransportKind::Socket, port),
        ..FederationSettings::default()
    });

    let err = registry
        .initialize(vec![client("default", transport(TransportKind::Socket, 0)), s2s], 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Validation(ValidationError::MissingDialbackSecret)
    ));
    assert!(err.to_string().contains("dialback secret"));

    assert!(router.domains.lock().unwrap().is_empty());
    assert!(!registry.is_initialized());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn federation_streams_register_as_s2s() {
    let (registry, router) = registry();
    let s2s = federation(FederationSettings {
        dialback_secret: "secret".to_string(),
        local_domain: "example.org".to_string(),
        transport: transport(TransportKind::Socket, 0),
        ..FederationSettings::default()
    });
    let task = start(&registry, vec![s2s], 0).await;

    let addr = registry.server("s2s").unwrap().local_addr().unwrap();
    let _peer = TcpStream::connect(addr).await.unwrap();

    for _ in 0..300 {
        if !router.s2s_ids().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(router.s2s_ids(), vec!["s2s:1".to_string()]);
    assert!(router.c2s_ids().is_empty());

    registry.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_conflict_resets_registry() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let (registry, _router) = registry();
    let err = registry
        .initialize(
            vec![
                client("free", transport(TransportKind::Socket, 0)),
                client("busy", transport(TransportKind::Socket, port)),
            ],
            0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Server(ServerError::Bind { .. })));
    assert!(!registry.is_initialized());
    assert!(registry.server_ids().is_empty());

    // The registry can start again once the conflict is gone.
    drop(occupied);
    let task = start(&registry, vec![client("free", transport(TransportKind::Socket, 0))], 0).await;
    assert_eq!(registry.server_ids(), vec!["free".to_string()]);
    registry.shutdown().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn registry_can_be_reinitialized() {
    let (registry, router) = registry();
    for incarnation in 1..=2 {
        let task = start(&registry, vec![client("default", transport(TransportKind::Socket, 0))], 0).await;
        let addr = registry.server("default").unwrap().local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        router.wait_c2s(incarnation).await;
        registry.shutdown().await;
        task.await.unwrap().unwrap();
    }

    // A new incarnation builds new servers, so ids start over.
    assert_eq!(router.c2s_ids(), vec!["default:1", "default:1"]);
}
