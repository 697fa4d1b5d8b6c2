//! Client builder for the engine client.
//!
//! Provides a fluent API for configuring and building an [`EngineClient`].
//!
//! The engine endpoint is resolved through a fallback chain:
//!
//! 1. An explicit [`ClientBuilder::host`]
//! 2. The `DOCKER_HOST` environment variable
//! 3. The `CONTAINER_HOST` environment variable
//! 4. `unix:///var/run/docker.sock`

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, Uri};
use rustls::ClientConfig;

use crate::client::EngineClient;
use crate::interceptor::{Interceptor, InterceptorChain, SendFn};
use crate::streaming::DEFAULT_MAX_BUFFER;
use crate::transport::{HyperTransport, Transport, UnixTransport};
use crate::{ClientError, WireRequest};

/// Socket used when nothing else is configured.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Environment variables consulted, in order, when no host is set.
pub const HOST_ENV_VARS: [&str; 2] = ["DOCKER_HOST", "CONTAINER_HOST"];

/// Where the engine listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineHost {
    /// A Unix domain socket path.
    Unix(PathBuf),
    /// A TCP endpoint, as an `http` or `https` base URI.
    Tcp(Uri),
}

impl EngineHost {
    /// Parse `unix://`, `tcp://`, `http://` or `https://` hosts, or a bare
    /// absolute socket path.
    ///
    /// `tcp://` maps to `http://`; the builder upgrades it to `https://` when
    /// a TLS configuration is supplied.
    pub fn parse(host: &str) -> Result<Self, ClientBuildError> {
        let invalid = |reason: &str| ClientBuildError::InvalidHost(format!("{host}: {reason}"));
        let host = host.trim();

        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            return Ok(EngineHost::Unix(PathBuf::from(path)));
        }
        if host.starts_with('/') {
            return Ok(EngineHost::Unix(PathBuf::from(host)));
        }

        let uri = match host.strip_prefix("tcp://") {
            Some(rest) => format!("http://{rest}"),
            None if host.starts_with("http://") || host.starts_with("https://") => host.to_owned(),
            None => return Err(invalid("unsupported scheme")),
        };
        let uri: Uri = uri.parse().map_err(|_| invalid("malformed address"))?;
        if uri.authority().is_none() {
            return Err(invalid("missing address"));
        }
        Ok(EngineHost::Tcp(uri))
    }

    /// Resolve the host from an explicit value, then from the environment
    /// through `lookup`, then the default socket.
    pub fn resolve(
        explicit: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ClientBuildError> {
        if let Some(host) = explicit {
            return Self::parse(host);
        }
        for var in HOST_ENV_VARS {
            if let Some(host) = lookup(var).filter(|h| !h.trim().is_empty()) {
                #[cfg(feature = "tracing")]
                tracing::debug!(var, host = %host, "engine host from environment");
                return Self::parse(&host);
            }
        }
        Ok(EngineHost::Unix(PathBuf::from(DEFAULT_SOCKET)))
    }
}

impl FromStr for EngineHost {
    type Err = ClientBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineHost::Unix(path) => write!(f, "unix://{}", path.display()),
            EngineHost::Tcp(uri) => write!(f, "{uri}"),
        }
    }
}

/// Builder for creating an [`EngineClient`].
///
/// # Example
///
/// ```ignore
/// use dockwire_client::ClientBuilder;
///
/// let client = ClientBuilder::new()
///     .host("unix:///run/user/1000/podman/podman.sock")
///     .api_version("1.43")
///     .read_timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub struct ClientBuilder {
    /// Explicit engine host; `None` falls back to the environment.
    host: Option<String>,
    /// Pre-built transport, bypassing host resolution.
    transport: Option<Arc<dyn Transport>>,
    interceptors: InterceptorChain,
    /// API version prefixed to every path, without the leading `v`.
    api_version: Option<String>,
    user_agent: String,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    tls_config: Option<ClientConfig>,
    max_json_buffer: usize,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("host", &self.host)
            .field("transport", &self.transport.is_some())
            .field("interceptors", &self.interceptors)
            .field("api_version", &self.api_version)
            .field("user_agent", &self.user_agent)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("tls_config", &self.tls_config.is_some())
            .field("max_json_buffer", &self.max_json_buffer)
            .finish()
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            transport: None,
            interceptors: InterceptorChain::new(),
            api_version: None,
            user_agent: concat!("dockwire/", env!("CARGO_PKG_VERSION")).to_owned(),
            connect_timeout: None,
            read_timeout: None,
            tls_config: None,
            max_json_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    /// Set the engine host (`unix:///path`, `tcp://host:port`,
    /// `https://host:port`).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Use a ready-made transport instead of resolving a host.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Add an interceptor. Interceptors see requests in the order they were
    /// added.
    pub fn with_interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Pin the engine API version, e.g. `"1.43"`. Every request path is then
    /// sent as `/v1.43/...`.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.api_version = Some(version.trim_start_matches('v').to_owned());
        self
    }

    /// Set the `User-Agent` sent when a request carries none.
    ///
    /// Default: `dockwire/<version>`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound each read from the engine. Leave unset when following event
    /// feeds or logs that may be quiet for long stretches.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// TLS configuration for TCP hosts. Setting one turns `tcp://` hosts
    /// into `https://`.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Cap the bytes a JSON feed buffers for one incomplete value.
    ///
    /// Default: 16 MiB.
    pub fn max_json_buffer(mut self, limit: usize) -> Self {
        self.max_json_buffer = limit;
        self
    }

    /// Build the client, reading the environment if no host was set.
    pub fn build(self) -> Result<EngineClient, ClientBuildError> {
        let lookup = |var: &str| std::env::var(var).ok();
        self.build_with_env(lookup)
    }

    fn build_with_env(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<EngineClient, ClientBuildError> {
        let user_agent = HeaderValue::try_from(self.user_agent.as_str())
            .map_err(|_| ClientBuildError::InvalidHeader(self.user_agent.clone()))?;

        let (transport, host) = match self.transport.take() {
            Some(transport) => (transport, None),
            None => {
                let host = EngineHost::resolve(self.host.as_deref(), lookup)?;
                (self.transport_for(&host)?, Some(host))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            host = host.as_ref().map(ToString::to_string),
            api_version = self.api_version.as_deref(),
            interceptors = self.interceptors.len(),
            "engine client built"
        );

        let base: SendFn = Arc::new(move |request: WireRequest| transport.send(request));
        let send = self.interceptors.wrap_send(base);

        Ok(EngineClient::new(
            send,
            host,
            self.api_version,
            user_agent,
            self.max_json_buffer,
        ))
    }

    fn transport_for(&mut self, host: &EngineHost) -> Result<Arc<dyn Transport>, ClientBuildError> {
        match host {
            EngineHost::Unix(path) => {
                let mut builder = UnixTransport::builder(path);
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if let Some(timeout) = self.read_timeout {
                    builder = builder.read_timeout(timeout);
                }
                Ok(Arc::new(builder.build()?))
            }
            EngineHost::Tcp(uri) => {
                let mut uri = uri.clone();
                if self.tls_config.is_some() && uri.scheme() == Some(&http::uri::Scheme::HTTP) {
                    let mut parts = uri.into_parts();
                    parts.scheme = Some(http::uri::Scheme::HTTPS);
                    uri = Uri::from_parts(parts)
                        .map_err(|e| ClientBuildError::InvalidHost(e.to_string()))?;
                }

                let mut builder = HyperTransport::builder(uri);
                if let Some(config) = self.tls_config.take() {
                    builder = builder.tls_config(config);
                }
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                if let Some(timeout) = self.read_timeout {
                    builder = builder.read_timeout(timeout);
                }
                Ok(Arc::new(builder.build()?))
            }
        }
    }
}

/// Error type for client building failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// The engine host could not be parsed.
    #[error("invalid engine host {0}")]
    InvalidHost(String),

    /// A configured header value is not a valid HTTP header.
    #[error("invalid header value: {0:?}")]
    InvalidHeader(String),

    /// The transport could not be created.
    #[error("failed to create transport: {0}")]
    Transport(#[from] ClientError),
}
