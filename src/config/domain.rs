//! Validated per-domain configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::federation::FederationConfig;
use crate::config::schema::{ClientSettings, TransportSection};
use crate::config::validation::ValidationError;
use crate::net::tls::{load_certificate, Certificate};
use crate::transport::TransportKind;

pub const DEFAULT_C2S_PORT: u16 = 5222;
pub const DEFAULT_S2S_PORT: u16 = 5269;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_C2S_MAX_STANZA_SIZE: usize = 32_768;

/// Which side of the protocol a domain server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// Client-to-server.
    Client,
    /// Server-to-server (federation).
    Server,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamRole::Client => write!(f, "c2s"),
            StreamRole::Server => write!(f, "s2s"),
        }
    }
}

/// Validated listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub bind_address: String,
    pub port: u16,
    pub keep_alive: Duration,
    pub url_path: String,
    pub tls: bool,
}

impl TransportSettings {
    /// Apply defaults to a raw transport section.
    pub fn from_section(section: &TransportSection, default_port: u16) -> Self {
        let bind_address = if section.bind_addr.is_empty() {
            "0.0.0.0".to_string()
        } else {
            section.bind_addr.clone()
        };
        let keep_alive = match section.keep_alive {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_KEEP_ALIVE,
        };
        Self {
            kind: section.kind,
            bind_address,
            port: section.port.unwrap_or(default_port),
            keep_alive,
            url_path: section.url_path.clone(),
            tls: section.tls,
        }
    }
}

/// Immutable configuration shared by a domain server and all of its streams.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub id: String,
    pub domain: String,
    pub role: StreamRole,
    pub transport: TransportSettings,
    pub certificate: Arc<Certificate>,
    pub connect_timeout: Duration,
    pub max_stanza_size: usize,
    pub federation: Option<FederationConfig>,
}

impl DomainConfig {
    /// Validate a c2s entry and load its certificate.
    pub fn client(settings: &ClientSettings) -> Result<Self, ValidationError> {
        if settings.id.is_empty() {
            return Err(ValidationError::MissingServerId {
                role: StreamRole::Client,
            });
        }
        if settings.domain.is_empty() {
            return Err(ValidationError::MissingDomain {
                id: settings.id.clone(),
            });
        }
        let transport = TransportSettings::from_section(&settings.transport, DEFAULT_C2S_PORT);
        if transport.kind == TransportKind::WebSocket && !transport.url_path.starts_with('/') {
            return Err(ValidationError::InvalidTransport {
                id: settings.id.clone(),
                reason: format!("url_path {:?} must start with '/'", transport.url_path),
            });
        }

        let certificate = load_certificate(
            &settings.tls.privkey_path,
            &settings.tls.cert_path,
            &settings.domain,
        )
        .map_err(|source| ValidationError::Certificate {
            domain: settings.domain.clone(),
            source,
        })?;

        let connect_timeout = match settings.connect_timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_CONNECT_TIMEOUT,
        };
        let max_stanza_size = match settings.max_stanza_size {
            Some(size) if size > 0 => size,
            _ => DEFAULT_C2S_MAX_STANZA_SIZE,
        };

        Ok(Self {
            id: settings.id.clone(),
            domain: settings.domain.clone(),
            role: StreamRole::Client,
            transport,
            certificate: Arc::new(certificate),
            connect_timeout,
            max_stanza_size,
            federation: None,
        })
    }

    /// Build the s2s server configuration from a validated federation config.
    pub fn federation(id: &str, federation: FederationConfig) -> Self {
        Self {
            id: id.to_string(),
            domain: federation.local_domain.clone(),
            role: StreamRole::Server,
            transport: federation.transport.clone(),
            certificate: Arc::clone(&federation.certificate),
            connect_timeout: federation.dial_timeout,
            max_stanza_size: federation.max_stanza_size,
            federation: Some(federation),
        }
    }
}
