//! TCP and TLS connector setup for the hyper transport.
//!
//! TLS support requires both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! Certificate management beyond picking a root store is left to the caller,
//! who can hand a ready [`ClientConfig`] to
//! [`HyperTransportBuilder::tls_config`](super::HyperTransportBuilder::tls_config).

use std::time::Duration;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;

/// Whether this build can reach `https` engines without a caller-supplied
/// [`ClientConfig`]: a crypto provider and a root store are both enabled.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

/// A config builder on the enabled provider, falling back to the process-wide
/// default a caller may have installed.
fn try_get_crypto_provider_builder()
-> Option<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    #[cfg(feature = "tls-ring")]
    let provider = Some(std::sync::Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(std::sync::Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider = rustls::crypto::CryptoProvider::get_default().cloned();

    ClientConfig::builder_with_provider(provider?)
        .with_safe_default_protocol_versions()
        .ok()
}

/// The TLS configuration used for `https` hosts when none is supplied.
///
/// `None` when no crypto provider or no root store is available.
pub fn default_tls_config() -> Option<ClientConfig> {
    let builder = try_get_crypto_provider_builder()?;
    let roots = build_root_store()?;

    Some(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Native roots win when both root features are on.
fn build_root_store() -> Option<rustls::RootCertStore> {
    #[cfg(feature = "tls-native-roots")]
    {
        let mut roots = rustls::RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            // Some certs may still have loaded.
            #[cfg(feature = "tracing")]
            tracing::debug!("errors loading native certs: {:?}", native_certs.errors);
        }
        roots.add_parsable_certificates(native_certs.certs);
        Some(roots)
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Some(roots)
    }

    #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
    {
        None
    }
}

/// Build a plain TCP connector.
///
/// `enforce_http` is off so the same connector can sit under the TLS layer.
pub fn build_http_connector(connect_timeout: Option<Duration>) -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);
    connector.set_connect_timeout(connect_timeout);
    connector
}

/// Build a connector that speaks TLS for `https` URIs and plain TCP otherwise.
pub fn build_https_connector(
    tls_config: ClientConfig,
    connect_timeout: Option<Duration>,
) -> HttpsConnector<HttpConnector> {
    HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .wrap_connector(build_http_connector(connect_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_tls_support_matches_default_config() {
        if has_tls_support() {
            assert!(default_tls_config().is_some());
        }
    }

    #[test]
    fn test_http_connector_builds() {
        let _connector = build_http_connector(Some(Duration::from_secs(1)));
    }
}
