//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Unique server ids across c2s and s2s
//! - Required federation trust material
//!
//! # Design Decisions
//! - `validate_config` returns all structural errors, not just the first
//! - Certificate loading happens at construction, not here

use std::collections::HashSet;

use crate::config::domain::StreamRole;
use crate::config::schema::ServerConfig;
use crate::net::tls::TlsError;
use crate::transport::TransportKind;

/// A single semantic configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("s2s: must specify a dialback secret")]
    MissingDialbackSecret,

    #[error("s2s: must specify a local domain")]
    MissingLocalDomain,

    #[error("{role}: server id must not be empty")]
    MissingServerId { role: StreamRole },

    #[error("c2s {id}: must specify a domain")]
    MissingDomain { id: String },

    #[error("duplicate server id {0:?}")]
    DuplicateServerId(String),

    #[error("{id}: invalid transport: {reason}")]
    InvalidTransport { id: String, reason: String },

    #[error("{domain}: certificate: {source}")]
    Certificate {
        domain: String,
        #[source]
        source: TlsError,
    },
}

/// Check the parts of the configuration that need no I/O.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();

    for c2s in &config.c2s {
        if c2s.id.is_empty() {
            errors.push(ValidationError::MissingServerId {
                role: StreamRole::Client,
            });
        } else if !ids.insert(c2s.id.as_str()) {
            errors.push(ValidationError::DuplicateServerId(c2s.id.clone()));
        }
        if c2s.domain.is_empty() {
            errors.push(ValidationError::MissingDomain { id: c2s.id.clone() });
        }
        if c2s.transport.kind == TransportKind::WebSocket && !c2s.transport.url_path.starts_with('/') {
            errors.push(ValidationError::InvalidTransport {
                id: c2s.id.clone(),
                reason: format!("url_path {:?} must start with '/'", c2s.transport.url_path),
            });
        }
    }

    if let Some(s2s) = config.s2s.as_ref().filter(|s2s| !s2s.disabled) {
        if s2s.id.is_empty() {
            errors.push(ValidationError::MissingServerId {
                role: StreamRole::Server,
            });
        } else if !ids.insert(s2s.id.as_str()) {
            errors.push(ValidationError::DuplicateServerId(s2s.id.clone()));
        }
        if s2s.dialback_secret.is_empty() {
            errors.push(ValidationError::MissingDialbackSecret);
        }
        if s2s.local_domain.is_empty() {
            errors.push(ValidationError::MissingLocalDomain);
        }
        if s2s.transport.kind != TransportKind::Socket {
            errors.push(ValidationError::InvalidTransport {
                id: s2s.id.clone(),
                reason: "federation only accepts socket transport".to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
