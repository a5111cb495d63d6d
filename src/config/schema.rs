//! Configuration schema definitions.
//!
//! This module defines the raw, file-level configuration structure.
//! Values here are unvalidated; `domain.rs` and `federation.rs` turn them
//! into the immutable structures the servers run with.

use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

/// Root configuration for the server process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Logging settings.
    pub logging: LoggingConfig,

    /// Diagnostics endpoint settings.
    pub diagnostics: DiagnosticsConfig,

    /// Client-to-server domains, one listener each.
    pub c2s: Vec<ClientSettings>,

    /// Server-to-server federation settings.
    pub s2s: Option<FederationSettings>,
}

impl ServerConfig {
    /// Every configured domain, c2s first.
    pub fn domains(&self) -> Vec<DomainSettings> {
        let mut domains: Vec<DomainSettings> = self
            .c2s
            .iter()
            .cloned()
            .map(DomainSettings::Client)
            .collect();
        if let Some(s2s) = &self.s2s {
            domains.push(DomainSettings::Federation(s2s.clone()));
        }
        domains
    }
}

/// One unvalidated domain entry handed to the registry.
#[derive(Debug, Clone)]
pub enum DomainSettings {
    /// Client-to-server domain.
    Client(ClientSettings),
    /// Server-to-server federation domain.
    Federation(FederationSettings),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, for development.
    #[default]
    Pretty,
    /// One JSON object per line, for production.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub level: String,

    /// Log line format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Diagnostics endpoint configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Port on 127.0.0.1 to serve diagnostics on. 0 disables it.
    pub port: u16,
}

/// Transport section shared by c2s and s2s entries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportSection {
    /// Wire encoding.
    #[serde(rename = "type")]
    pub kind: TransportKind,

    /// Interface to bind. Empty means all interfaces.
    pub bind_addr: String,

    /// Port to bind. Unset means the role default, 0 an ephemeral port.
    pub port: Option<u16>,

    /// Idle timeout in seconds. Unset or 0 means 120.
    pub keep_alive: Option<u64>,

    /// HTTP path serving WebSocket upgrades.
    pub url_path: String,

    /// Terminate TLS in front of WebSocket upgrades.
    pub tls: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            kind: TransportKind::Socket,
            bind_addr: String::new(),
            port: None,
            keep_alive: None,
            url_path: "/xmpp/ws".to_string(),
            tls: true,
        }
    }
}

/// PEM file locations.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsSection {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub privkey_path: String,
}

/// Client-to-server domain configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSettings {
    /// Unique server identifier, used as the stream id prefix.
    pub id: String,

    /// Domain this server answers for.
    pub domain: String,

    /// Listener transport.
    #[serde(default)]
    pub transport: TransportSection,

    /// Certificate files. Empty paths mean a self-signed certificate.
    #[serde(default)]
    pub tls: TlsSection,

    /// Seconds a client has to open its stream. Unset or 0 means 5.
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Largest stanza accepted, in bytes. Unset or 0 means 32768.
    #[serde(default)]
    pub max_stanza_size: Option<usize>,
}

/// Server-to-server federation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FederationSettings {
    /// Server identifier, used as the stream id prefix.
    pub id: String,

    /// Excludes federation entirely; nothing else is validated.
    pub disabled: bool,

    /// Outbound dial timeout in seconds. Unset or 0 means 10.
    pub dial_timeout: Option<u64>,

    /// Shared secret for dialback key generation.
    pub dialback_secret: String,

    /// Largest stanza accepted, in bytes. Unset or 0 means 131072.
    pub max_stanza_size: Option<usize>,

    /// This server's federation identity.
    #[serde(rename = "localdomain")]
    pub local_domain: String,

    /// Certificate files for `local_domain`.
    pub tls: TlsSection,

    /// Listener transport (socket only).
    pub transport: TransportSection,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            id: "s2s".to_string(),
            disabled: false,
            dial_timeout: None,
            dialback_secret: String::new(),
            max_stanza_size: None,
            local_domain: String::new(),
            tls: TlsSection::default(),
            transport: TransportSection::default(),
        }
    }
}
