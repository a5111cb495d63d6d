//! Server-to-server federation configuration.
//!
//! A federation config is either absent (disabled) or complete: a dialback
//! secret, a local domain and a loaded certificate are all present before
//! the s2s listener may bind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::domain::{TransportSettings, DEFAULT_S2S_PORT};
use crate::config::schema::FederationSettings;
use crate::config::validation::ValidationError;
use crate::net::tls::{load_certificate, Certificate};
use crate::transport::TransportKind;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_S2S_MAX_STANZA_SIZE: usize = 131_072;

/// Validated federation parameters.
#[derive(Clone)]
pub struct FederationConfig {
    pub dial_timeout: Duration,
    pub dialback_secret: String,
    pub max_stanza_size: usize,
    pub local_domain: String,
    pub certificate: Arc<Certificate>,
    pub transport: TransportSettings,
}

impl FederationConfig {
    /// Validate raw settings.
    ///
    /// Returns `Ok(None)` for a disabled section without looking at any other
    /// field.
    pub fn from_settings(settings: &FederationSettings) -> Result<Option<Self>, ValidationError> {
        if settings.disabled {
            return Ok(None);
        }
        if settings.dialback_secret.is_empty() {
            return Err(ValidationError::MissingDialbackSecret);
        }
        if settings.local_domain.is_empty() {
            return Err(ValidationError::MissingLocalDomain);
        }
        if settings.transport.kind != TransportKind::Socket {
            return Err(ValidationError::InvalidTransport {
                id: settings.id.clone(),
                reason: format!("federation only accepts socket transport, got {}", settings.transport.kind),
            });
        }

        let certificate = load_certificate(
            &settings.tls.privkey_path,
            &settings.tls.cert_path,
            &settings.local_domain,
        )
        .map_err(|source| ValidationError::Certificate {
            domain: settings.local_domain.clone(),
            source,
        })?;

        let dial_timeout = match settings.dial_timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_DIAL_TIMEOUT,
        };
        let max_stanza_size = match settings.max_stanza_size {
            Some(size) if size > 0 => size,
            _ => DEFAULT_S2S_MAX_STANZA_SIZE,
        };

        Ok(Some(Self {
            dial_timeout,
            dialback_secret: settings.dialback_secret.clone(),
            max_stanza_size,
            local_domain: settings.local_domain.clone(),
            certificate: Arc::new(certificate),
            transport: TransportSettings::from_section(&settings.transport, DEFAULT_S2S_PORT),
        }))
    }
}

impl fmt::Debug for FederationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationConfig")
            .field("dial_timeout", &self.dial_timeout)
            .field("dialback_secret", &"<redacted>")
            .field("max_stanza_size", &self.max_stanza_size)
            .field("local_domain", &self.local_domain)
            .field("certificate", &self.certificate)
            .field("transport", &self.transport)
            .finish()
    }
}
