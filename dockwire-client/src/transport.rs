//! Transports that carry a [`WireRequest`] to the engine.
//!
//! This module provides the [`Transport`] trait and its two implementations:
//!
//! - [`UnixTransport`]: one fresh connection per call over a Unix domain
//!   socket, the engine's default endpoint
//! - [`HyperTransport`]: hyper_util's legacy client over TCP, with TLS for
//!   `https` hosts (feature-gated)
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use dockwire_client::transport::{Transport, UnixTransport};
//! use dockwire_client::WireRequest;
//!
//! let transport = UnixTransport::builder("/var/run/docker.sock")
//!     .read_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let response = transport.send(WireRequest::get("/version")).await?;
//! ```

mod connector;
mod hyper;
mod unix;

use futures::future::BoxFuture;

pub use connector::{build_http_connector, build_https_connector, default_tls_config, has_tls_support};
pub use hyper::{HyperTransport, HyperTransportBuilder};
pub use unix::{DEFAULT_CHUNK_SIZE, UnixTransport, UnixTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

use crate::{ClientError, WireRequest, WireResponse};

/// Something that can execute one request against the engine.
///
/// The returned future owns everything it needs, so a transport can be
/// shared behind an `Arc` and called from many tasks at once.
pub trait Transport: Send + Sync + 'static {
    /// Send `request` and wait for its response.
    ///
    /// For a buffered request the future completes once the whole body has
    /// been read. For a streaming request it completes once the head has been
    /// parsed and the body is handed back open.
    fn send(&self, request: WireRequest) -> BoxFuture<'static, Result<WireResponse, ClientError>>;
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn send(&self, request: WireRequest) -> BoxFuture<'static, Result<WireResponse, ClientError>> {
        (**self).send(request)
    }
}
