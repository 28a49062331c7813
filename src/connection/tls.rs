//! TLS 1.2 client setup pinned to the hub vendor's root certificate.
//!
//! The hub presents a certificate chained to a private CA with no usable
//! subject name, so the chain and handshake signatures are verified against
//! the pinned root while name matching is skipped. The configured address is
//! what identifies the hub.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::verify_server_cert_signed_by_trust_anchor;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{HubError, Result};

fn tls_error(err: impl std::fmt::Display) -> HubError {
    HubError::Tls(err.to_string())
}

/// Reads every certificate in the PEM file at `path` into a root store.
pub fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path).map_err(|e| {
        HubError::Config(format!("cannot open CA certificate {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?).map_err(tls_error)?;
    }
    if roots.is_empty() {
        return Err(HubError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

/// Chain and signature checks against a pinned root, without name matching.
#[derive(Debug)]
pub struct PinnedRootVerifier {
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
}

impl PinnedRootVerifier {
    pub fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Self {
        Self { roots, provider }
    }
}

impl ServerCertVerifier for PinnedRootVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client config restricted to TLS 1.2 and the pinned root in `ca_path`.
pub fn client_config(ca_path: &Path) -> Result<Arc<ClientConfig>> {
    let roots = load_root_store(ca_path)?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinnedRootVerifier::new(roots, provider.clone());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12])
        .map_err(tls_error)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Runs the TLS handshake over an established TCP stream.
pub async fn handshake(
    config: Arc<ClientConfig>,
    host: &str,
    tcp: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_owned()).map_err(tls_error)?;
    let stream = TlsConnector::from(config)
        .connect(server_name, tcp)
        .await?;
    debug!(host, "tls handshake complete");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_ca_file_is_config_error() {
        let err = client_config(Path::new("/nonexistent/velux-ca.pem")).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }

    #[test]
    fn pem_without_certificates_is_rejected() {
        let path = std::env::temp_dir().join(format!("klf-hub-empty-{}.pem", std::process::id()));
        let mut file = File::create(&path).unwrap();
        writeln!(file, "not a certificate").unwrap();
        drop(file);

        let err = load_root_store(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, HubError::Config(_)));
    }
}
