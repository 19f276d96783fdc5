//! TLS session establishment.
//!
//! Builds the client configuration once per client and runs the handshake
//! over an already connected (possibly tunnelled) stream, with SNI set to the
//! target host and ALPN pinned to `http/1.1`.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error_handling::ClientError;

/// How the server certificate is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Certificate identity is not verified; handshake signatures still are.
    #[default]
    Insecure,
    /// Certificate chain and name are verified against the webpki roots.
    WebPki,
}

/// Accepts any server certificate.
///
/// Handshake signatures are still checked with the provider's algorithms, so
/// the peer must hold the key for the certificate it presents.
#[derive(Debug)]
pub struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl AcceptAnyServerCert {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self(provider)
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
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
            &self.0.signature_verification_algorithms,
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
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Builds the TLS connector for `mode`.
///
/// # Errors
///
/// Returns `ClientError::TlsConfig` if the protocol versions cannot be
/// configured for the crypto provider.
pub fn build_connector(mode: TlsMode) -> Result<TlsConnector, ClientError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let mut config = match mode {
        TlsMode::Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)))
            .with_no_client_auth(),
        TlsMode::WebPki => {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Runs the TLS handshake with SNI set to `host`.
///
/// # Errors
///
/// - `ClientError::InvalidServerName` if `host` is not a DNS name or IP
/// - `ClientError::TlsHandshake` carrying the underlying reason otherwise
pub async fn establish<S>(
    connector: &TlsConnector,
    stream: S,
    host: &str,
) -> Result<TlsStream<S>, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|_| ClientError::InvalidServerName {
            host: host.to_string(),
        })?;
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| ClientError::TlsHandshake {
            host: host.to_string(),
            source: e,
        })?;
    log::debug!(
        "TLS established with {host} ({:?})",
        tls.get_ref().1.protocol_version()
    );
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_mode_default_is_insecure() {
        assert_eq!(TlsMode::default(), TlsMode::Insecure);
    }

    #[test]
    fn test_build_connector_both_modes() {
        assert!(build_connector(TlsMode::Insecure).is_ok());
        assert!(build_connector(TlsMode::WebPki).is_ok());
    }

    #[test]
    fn test_accept_any_supports_provider_schemes() {
        let verifier = AcceptAnyServerCert::new(Arc::new(rustls::crypto::ring::default_provider()));
        let schemes = verifier.supported_verify_schemes();
        assert!(schemes.contains(&SignatureScheme::ECDSA_NISTP256_SHA256));
        assert!(schemes.contains(&SignatureScheme::RSA_PSS_SHA256));
        assert!(schemes.contains(&SignatureScheme::ED25519));
    }

    #[tokio::test]
    async fn test_establish_rejects_invalid_server_name() {
        let connector = build_connector(TlsMode::Insecure).unwrap();
        let (client, _server) = tokio::io::duplex(1024);
        let err = establish(&connector, client, "bad host name").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidServerName { .. }));
    }

    #[tokio::test]
    async fn test_establish_fails_on_non_tls_peer() {
        use tokio::io::AsyncWriteExt;
        let connector = build_connector(TlsMode::Insecure).unwrap();
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let _ = server.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            let _ = server.shutdown().await;
        });
        let err = establish(&connector, client, "localhost").await.unwrap_err();
        assert!(matches!(err, ClientError::TlsHandshake { .. }), "got {err:?}");
    }
}
