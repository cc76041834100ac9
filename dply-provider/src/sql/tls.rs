use std::io::BufReader;
use std::sync::Arc;

use dply_config::shared::TlsConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::encryption::install_crypto_provider_once;
use crate::error::{ErrorKind, ProviderResult};
use crate::{bail, provider_error};

/// Builds the rustls configuration of a SQL session.
///
/// With trusted roots the server chain is verified against them only. Without
/// roots the session is encrypted and the server certificate is accepted as is.
pub fn build_client_config(tls: &TlsConfig) -> ProviderResult<ClientConfig> {
    install_crypto_provider_once();

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    if !tls.verifies_server() {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth());
    }

    let root_store = load_root_store(&tls.trusted_root_certs)?;

    Ok(builder
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

fn load_root_store(pem: &str) -> ProviderResult<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let mut reader = BufReader::new(pem.as_bytes());

    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|err| {
            provider_error!(
                ErrorKind::TlsConfigInvalid,
                "Trusted root certificates could not be read",
                err
            )
        })?;
        root_store.add(cert)?;
    }

    if root_store.is_empty() {
        bail!(
            ErrorKind::TlsConfigInvalid,
            "Trusted root certificates could not be read",
            "no certificate found in the PEM data"
        );
    }

    Ok(root_store)
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
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
