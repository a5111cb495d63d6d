//! streamgate
//!
//! Accepts XMPP client and federation connections, one listener per
//! configured domain, and hands every accepted stream to the router.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                    STREAMGATE                     │
//!                     │                                                   │
//!   c2s (5222) ───────┼─▶ DomainServer ──┐                                │
//!   ws (/xmpp/ws) ────┼─▶ DomainServer ──┼─▶ StreamFactory ─▶ Router ─────┼──▶ stream
//!   s2s (5269) ───────┼─▶ DomainServer ──┘   ("{id}:{n}")                 │   processor
//!                     │         ▲                                         │
//!                     │         │ start / sweep                           │
//!                     │   ServerRegistry ◀── shutdown ◀── SIGINT/SIGTERM  │
//!                     │         │                                         │
//!                     │         └──▶ diagnostics (127.0.0.1, optional)    │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use streamgate::config::load_config;
use streamgate::lifecycle::signals::wait_for_signal;
use streamgate::observability::{logging, metrics};
use streamgate::{LocalRouter, ServerRegistry, StreamHandle};

#[derive(Parser, Debug)]
#[command(name = "streamgate", version, about = "XMPP connection acceptance core")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "streamgate.toml")]
    config: PathBuf,

    /// Diagnostics port on 127.0.0.1, overrides the config file (0 disables)
    #[arg(long)]
    debug_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        c2s = config.c2s.len(),
        s2s = config.s2s.as_ref().is_some_and(|s2s| !s2s.disabled),
        "streamgate starting"
    );

    let diagnostics_port = cli.debug_port.unwrap_or(config.diagnostics.port);
    if diagnostics_port > 0 {
        metrics::install_recorder()?;
    }

    let (router, streams) = LocalRouter::new();
    tokio::spawn(process_streams(streams));

    let registry = Arc::new(ServerRegistry::new(Arc::new(router)));
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            wait_for_signal().await;
            registry.shutdown().await;
        });
    }

    if let Err(e) = registry.initialize(config.domains(), diagnostics_port).await {
        tracing::error!(error = %e, "Startup failed");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Stand-in stream processor: the XMPP state machine lives outside this
/// binary, so accepted streams are logged and closed.
async fn process_streams(mut streams: mpsc::UnboundedReceiver<StreamHandle>) {
    while let Some(stream) = streams.recv().await {
        let (id, mut transport, config) = stream.into_parts();
        tracing::info!(
            stream_id = %id,
            domain = %config.domain,
            role = %config.role,
            transport = %transport.kind(),
            peer = ?transport.peer_addr(),
            "Stream accepted"
        );
        if let Err(e) = transport.close().await {
            tracing::debug!(stream_id = %id, error = %e, "Close failed");
        }
    }
}
