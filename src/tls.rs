//! Certificates for the HTTPS listener
//!
//! The listener only depends on [`CertificateProvider`]; where certificates
//! come from (files on disk, a generated self-signed pair, an ACME client) is
//! up to the implementation.

use rcgen::{generate_simple_self_signed, CertifiedKey as GeneratedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Supplies the certificate presented for a TLS handshake
pub trait CertificateProvider: Send + Sync {
    /// Certificate for the SNI name, or `None` to abort the handshake
    fn certificate(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>>;
}

/// A single certificate served for every name
pub struct StaticCertificate {
    key: Arc<CertifiedKey>,
}

impl StaticCertificate {
    pub fn new(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> anyhow::Result<Self> {
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
            .map_err(|e| anyhow::anyhow!("Failed to create signing key: {}", e))?;
        Ok(Self {
            key: Arc::new(CertifiedKey::new(certs, signing_key)),
        })
    }

    /// Load a PEM certificate chain and private key
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> anyhow::Result<Self> {
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        Self::new(certs, key)
    }

    /// Generate a self-signed certificate covering `names`
    pub fn self_signed(names: Vec<String>) -> anyhow::Result<Self> {
        let GeneratedKey { cert, key_pair } = generate_simple_self_signed(names)
            .map_err(|e| anyhow::anyhow!("Failed to generate self-signed certificate: {}", e))?;

        let cert_der = CertificateDer::from(cert.der().to_vec());
        let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|e| anyhow::anyhow!("Failed to serialize private key: {}", e))?;
        Self::new(vec![cert_der], key_der)
    }
}

impl CertificateProvider for StaticCertificate {
    fn certificate(&self, _server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.key))
    }
}

/// Adapts a [`CertificateProvider`] to rustls
struct ProviderResolver {
    provider: Arc<dyn CertificateProvider>,
}

impl std::fmt::Debug for ProviderResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for ProviderResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        let cert = self.provider.certificate(server_name);
        if cert.is_none() {
            debug!(sni = ?server_name, "No certificate for server name");
        }
        cert
    }
}

/// Build a TLS acceptor that asks `provider` for every handshake
pub fn acceptor(provider: Arc<dyn CertificateProvider>) -> TlsAcceptor {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(ProviderResolver { provider }));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    TlsAcceptor::from(Arc::new(config))
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        anyhow::anyhow!("Failed to open certificate file {}: {}", path.display(), e)
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            anyhow::anyhow!("Failed to parse certificates from {}: {}", path.display(), e)
        })?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path.display());
    }

    Ok(certs)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open key file {}: {}", path.display(), e))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse key from {}: {}", path.display(), e))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => break,
            _ => continue,
        }
    }

    anyhow::bail!("No private key found in {}", path.display())
}
