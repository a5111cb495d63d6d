//! TLS certificate loading.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;

/// Error type for certificate loading.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// Only one of the two PEM paths was configured.
    #[error("cert_path and privkey_path must be set together (cert: {cert_path:?}, key: {key_path:?})")]
    IncompletePaths {
        cert_path: String,
        key_path: String,
    },

    /// A configured PEM file does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A PEM file could not be read or decoded.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate file holds no certificates.
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    /// The key file holds no private key.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    /// Self-signed generation failed.
    #[error("failed to generate self-signed certificate: {0}")]
    SelfSigned(#[from] rcgen::Error),

    /// rustls rejected the certificate chain or key.
    #[error("invalid certificate material: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A certificate chain bound to one domain, ready to terminate TLS.
#[derive(Clone)]
pub struct Certificate {
    domain: String,
    chain: Vec<CertificateDer<'static>>,
    server_config: Arc<ServerConfig>,
    self_signed: bool,
}

impl Certificate {
    /// Domain the certificate was loaded for.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Whether the certificate was generated at startup.
    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    /// Server-side rustls configuration using this certificate.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("domain", &self.domain)
            .field("chain_len", &self.chain.len())
            .field("self_signed", &self.self_signed)
            .finish_non_exhaustive()
    }
}

/// Load the certificate for `domain` from PEM files.
///
/// With both paths empty a self-signed certificate for `domain` is generated
/// instead, which is only suitable for development.
pub fn load_certificate(
    privkey_path: &str,
    cert_path: &str,
    domain: &str,
) -> Result<Certificate, TlsError> {
    match (privkey_path.is_empty(), cert_path.is_empty()) {
        (true, true) => self_signed(domain),
        (false, false) => from_pem_files(Path::new(privkey_path), Path::new(cert_path), domain),
        _ => Err(TlsError::IncompletePaths {
            cert_path: cert_path.to_string(),
            key_path: privkey_path.to_string(),
        }),
    }
}

fn from_pem_files(key_path: &Path, cert_path: &Path, domain: &str) -> Result<Certificate, TlsError> {
    if !cert_path.exists() {
        return Err(TlsError::NotFound(cert_path.to_path_buf()));
    }
    if !key_path.exists() {
        return Err(TlsError::NotFound(key_path.to_path_buf()));
    }

    let chain = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|source| TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let certificate = build(domain, chain, key, false)?;
    tracing::debug!(domain = %domain, cert_path = ?cert_path, "Certificate loaded");
    Ok(certificate)
}

fn self_signed(domain: &str) -> Result<Certificate, TlsError> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![domain.to_string()])?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    tracing::warn!(domain = %domain, "No certificate configured, using a self-signed one");
    build(domain, vec![cert.der().clone()], key, true)
}

fn build(
    domain: &str,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    self_signed: bool,
) -> Result<Certificate, TlsError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain.clone(), key)?;

    Ok(Certificate {
        domain: domain.to_string(),
        chain,
        server_config: Arc::new(server_config),
        self_signed,
    })
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}
