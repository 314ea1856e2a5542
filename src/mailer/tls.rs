//! STARTTLS session upgrade shared by the SMTP and IMAP clients

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::warn;

/// TLS handshake timeout in seconds
const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

/// Dangerous certificate verifier that accepts all certificates
///
/// **Security Warning:** disables all certificate validation. Only use for
/// testing or with servers you trust on a secure network.
#[derive(Debug)]
struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// Upgrade an established plaintext stream to TLS after STARTTLS
///
/// # Errors
///
/// Returns [`Error::Tls`] on handshake or configuration failures and
/// [`Error::Timeout`] when the handshake exceeds its bound.
pub(crate) async fn upgrade(
    stream: TcpStream,
    host: &str,
    allow_insecure: bool,
) -> Result<TlsStream<TcpStream>> {
    use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
    let _ = CryptoProvider::install_default(ring::default_provider());

    let tls_config = if allow_insecure {
        warn!("TLS certificate validation disabled - connection vulnerable to MITM attacks");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host)
        .map_err(|err| Error::Tls(format!("Invalid domain: {}", err)))?
        .to_owned();

    timeout(
        Duration::from_secs(TLS_HANDSHAKE_TIMEOUT_SECS),
        connector.connect(server_name, stream),
    )
    .await
    .map_err(|_| Error::Timeout)?
    .map_err(|err| Error::Tls(format!("TLS handshake failed: {}", err)))
}
