use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Installs aws-lc-rs as the process wide rustls crypto provider.
///
/// Safe to call repeatedly. A provider installed earlier by someone else is left in place.
pub fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
