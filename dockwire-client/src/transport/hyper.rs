//! TCP transport for engines exposed over `tcp://`, `http://` or `https://`.
//!
//! This module provides [`HyperTransport`], which executes the same
//! [`WireRequest`] to [`WireResponse`] contract as the socket transport using
//! hyper_util's legacy client.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;
use http::Uri;
use http::uri::{Authority, Scheme};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tower_service::Service;

use super::Transport;
use super::connector::{build_http_connector, build_https_connector, default_tls_config};
use crate::response::{Body, BodyStream, trim_buffered};
use crate::{ClientError, WireRequest, WireResponse};

#[derive(Clone)]
enum HyperClient {
    Http(Client<HttpConnector, Full<Bytes>>),
    Https(Client<HttpsConnector<HttpConnector>, Full<Bytes>>),
}

impl HyperClient {
    async fn request(&self, request: http::Request<Full<Bytes>>) -> Result<http::Response<Incoming>, ClientError> {
        let result = match self {
            HyperClient::Http(client) => client.request(request).await,
            HyperClient::Https(client) => client.request(request).await,
        };
        result.map_err(|e| ClientError::Connection(format!("request failed: {e}")))
    }
}

/// HTTP transport using hyper_util's legacy client.
///
/// Request paths are resolved against a base URI that carries only a scheme
/// and an authority, e.g. `http://127.0.0.1:2375`.
///
/// # Example
///
/// ```ignore
/// use dockwire_client::transport::HyperTransport;
///
/// let transport = HyperTransport::builder("https://engine.internal:2376".parse()?)
///     .tls_config(my_tls_config)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    scheme: Scheme,
    authority: Authority,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("tls", &matches!(self.client, HyperClient::Https(_)))
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a new transport builder.
    pub fn builder(base_uri: Uri) -> HyperTransportBuilder {
        HyperTransportBuilder::new(base_uri)
    }

    /// Create a new transport with default settings.
    pub fn new(base_uri: Uri) -> Result<Self, ClientError> {
        Self::builder(base_uri).build()
    }

    /// The base URI requests are resolved against.
    pub fn base_uri(&self) -> Uri {
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query("/")
            .build()
            .unwrap_or_default()
    }

    /// Send a request and receive its response.
    pub async fn request(&self, request: WireRequest) -> Result<WireResponse, ClientError> {
        let streaming = request.is_streaming();
        let request = self.to_http(request)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.method(),
            uri = %request.uri(),
            streaming,
            "sending request"
        );

        let response = self.client.request(request).await?;
        let (parts, incoming) = response.into_parts();

        let stream = BodyStream::new(incoming.into_data_stream().map(|chunk| {
            chunk.map_err(|e| ClientError::Connection(format!("read response body: {e}")))
        }))
        .read_timeout(self.read_timeout);

        let body = if streaming {
            Body::Streaming(stream)
        } else {
            Body::Full(trim_buffered(&parts.headers, stream.collect().await?))
        };

        let reason = parts.status.canonical_reason().unwrap_or_default();
        Ok(WireResponse::new(parts.status.as_u16(), reason, parts.headers, body))
    }

    fn to_http(&self, request: WireRequest) -> Result<http::Request<Full<Bytes>>, ClientError> {
        request.validate_path()?;
        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(request.get_path())
            .build()
            .map_err(|e| ClientError::Encode(format!("invalid request path {}: {e}", request.get_path())))?;

        let mut builder = http::Request::builder()
            .method(request.get_method().clone())
            .uri(uri);
        for (name, value) in request.get_headers() {
            builder = builder.header(name, value);
        }

        let body = Full::new(request.get_body().cloned().unwrap_or_default());
        builder
            .body(body)
            .map_err(|e| ClientError::Encode(format!("failed to build request: {e}")))
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: WireRequest) -> BoxFuture<'static, Result<WireResponse, ClientError>> {
        let transport = self.clone();
        Box::pin(async move { transport.request(request).await })
    }
}

/// Builder for [`HyperTransport`].
///
/// # Example
///
/// ```ignore
/// use dockwire_client::transport::HyperTransportBuilder;
/// use std::time::Duration;
///
/// let transport = HyperTransportBuilder::new("http://127.0.0.1:2375".parse()?)
///     .connect_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct HyperTransportBuilder {
    base_uri: Uri,
    /// Custom TLS configuration.
    tls_config: Option<ClientConfig>,
    connect_timeout: Option<Duration>,
    /// Per-read bound on the response body.
    read_timeout: Option<Duration>,
}

impl HyperTransportBuilder {
    pub fn new(base_uri: Uri) -> Self {
        Self {
            base_uri,
            tls_config: None,
            connect_timeout: None,
            read_timeout: None,
        }
    }

    /// Set a custom TLS configuration.
    ///
    /// Use this for custom root certificates or client certificates, which
    /// engines protected with `--tlsverify` require.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Bound the time spent opening a connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound each individual body read.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Build the transport.
    ///
    /// `https` base URIs need a TLS configuration, either set explicitly or
    /// available from the enabled TLS features.
    pub fn build(self) -> Result<HyperTransport, ClientError> {
        let parts = self.base_uri.into_parts();
        let scheme = parts
            .scheme
            .ok_or_else(|| ClientError::Encode("base URI has no scheme".into()))?;
        let authority = parts
            .authority
            .ok_or_else(|| ClientError::Encode("base URI has no authority".into()))?;

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());

        let client = if scheme == Scheme::HTTPS {
            let tls_config = self.tls_config.or_else(default_tls_config).ok_or_else(|| {
                ClientError::Encode(
                    "https requires a TLS configuration; enable a tls feature or pass one".into(),
                )
            })?;
            HyperClient::Https(builder.build(build_https_connector(tls_config, self.connect_timeout)))
        } else if scheme == Scheme::HTTP {
            HyperClient::Http(builder.build(build_http_connector(self.connect_timeout)))
        } else {
            return Err(ClientError::Encode(format!("unsupported scheme: {scheme}")));
        };

        Ok(HyperTransport {
            client,
            scheme,
            authority,
            read_timeout: self.read_timeout,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("base_uri", &self.base_uri)
            .field("tls_config", &self.tls_config.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl Service<WireRequest> for HyperTransport {
    type Response = WireResponse;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // hyper_util legacy::Client is always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: WireRequest) -> Self::Future {
        self.send(request)
    }
}
