use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Installs the AWS LC provider as the process wide rustls crypto provider.
///
/// Both the Kubernetes client and the SQL session build rustls configs, and
/// rustls refuses to pick a provider on its own when more than one is compiled
/// in. If another component installed a provider first, that one is kept.
pub fn install_crypto_provider_once() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
