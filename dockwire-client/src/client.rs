//! The engine client.
//!
//! [`EngineClient`] ties a transport, the interceptor chain and per-client
//! defaults together, and offers the three shapes of engine call:
//!
//! - one-shot calls whose body is read whole ([`call`](EngineClient::call),
//!   [`call_json`](EngineClient::call_json))
//! - framed log output ([`logs`](EngineClient::logs),
//!   [`follow_logs`](EngineClient::follow_logs))
//! - endless JSON feeds ([`stream_json`](EngineClient::stream_json),
//!   [`events`](EngineClient::events))

use bytes::Bytes;
use http::{HeaderValue, header};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::builder::{ClientBuilder, EngineHost};
use crate::demux::{LogStream, demultiplex};
use crate::interceptor::SendFn;
use crate::streaming::{JsonStream, open_stream};
use crate::{ClientError, WireRequest, WireResponse};

/// Client for a container engine's HTTP API.
///
/// Cloning is cheap; clones share the transport.
///
/// # Example
///
/// ```ignore
/// use dockwire_client::EngineClient;
/// use futures::StreamExt;
///
/// let client = EngineClient::builder().api_version("1.43").build()?;
///
/// let version: serde_json::Value = client
///     .call_json(WireRequest::get("/version"), 200)
///     .await?;
///
/// let mut events = client.events().await?;
/// while let Some(event) = events.next().await {
///     println!("{}", event?["Action"]);
/// }
/// ```
#[derive(Clone)]
pub struct EngineClient {
    send: SendFn,
    host: Option<EngineHost>,
    /// Without the leading `v`.
    api_version: Option<String>,
    user_agent: HeaderValue,
    max_json_buffer: usize,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("host", &self.host)
            .field("api_version", &self.api_version)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl EngineClient {
    /// Create a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(
        send: SendFn,
        host: Option<EngineHost>,
        api_version: Option<String>,
        user_agent: HeaderValue,
        max_json_buffer: usize,
    ) -> Self {
        Self {
            send,
            host,
            api_version,
            user_agent,
            max_json_buffer,
        }
    }

    /// The resolved engine host, or `None` for a custom transport.
    pub fn host(&self) -> Option<&EngineHost> {
        self.host.as_ref()
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    /// The path actually sent for `path`, with the API version prefix.
    pub fn endpoint(&self, path: &str) -> String {
        match &self.api_version {
            Some(version) if path.starts_with('/') => format!("/v{version}{path}"),
            Some(version) => format!("/v{version}/{path}"),
            None => path.to_owned(),
        }
    }

    /// Send a request through the interceptor chain without checking the
    /// status.
    pub async fn send(&self, request: WireRequest) -> Result<WireResponse, ClientError> {
        let path = self.endpoint(request.get_path());
        let request = request
            .path(path)
            .default_header(header::USER_AGENT, self.user_agent.clone());

        #[cfg(feature = "tracing")]
        tracing::trace!(method = %request.get_method(), path = request.get_path(), "engine call");

        (self.send)(request).await
    }

    /// Send a request, require `expected`, and return the body.
    pub async fn call(&self, request: WireRequest, expected: u16) -> Result<Bytes, ClientError> {
        let endpoint = endpoint_name(&request);
        let response = self.send(request).await?;
        response.expect_status(&endpoint, expected).await?.bytes().await
    }

    /// Send a request, require `expected`, and decode the body as JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        request: WireRequest,
        expected: u16,
    ) -> Result<T, ClientError> {
        let endpoint = endpoint_name(&request);
        let response = self.send(request).await?;
        response.expect_status(&endpoint, expected).await?.json().await
    }

    /// Check that the engine answers `/_ping`.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call(WireRequest::get("/_ping"), 200).await.map(|_| ())
    }

    /// Read a finished log body at `path` (e.g.
    /// `/containers/{id}/logs?stdout=1&stderr=1`) as text.
    ///
    /// The body is read as it arrives rather than buffered, so payload bytes
    /// come back exactly as the container wrote them.
    pub async fn logs(&self, path: &str) -> Result<String, ClientError> {
        let request = WireRequest::get(path).streaming();
        let endpoint = endpoint_name(&request);
        let response = self.send(request).await?;
        demultiplex(response.expect_status(&endpoint, 200).await?).await
    }

    /// Follow a log body at `path` as it is written. Add `follow=1` to the
    /// query for output that keeps coming.
    pub async fn follow_logs(&self, path: &str) -> Result<LogStream, ClientError> {
        let request = WireRequest::get(path).streaming();
        let endpoint = endpoint_name(&request);
        let response = self.send(request).await?;
        Ok(LogStream::from_response(response.expect_status(&endpoint, 200).await?))
    }

    /// Open a JSON feed with a GET to `path`.
    pub async fn stream_json<T: DeserializeOwned>(
        &self,
        path: &str,
        expected: u16,
    ) -> Result<JsonStream<T>, ClientError> {
        self.stream_json_request(WireRequest::get(path), expected).await
    }

    /// Open a JSON feed for any request, e.g. a `POST /images/create` pull
    /// whose progress arrives as a stream of objects.
    pub async fn stream_json_request<T: DeserializeOwned>(
        &self,
        request: WireRequest,
        expected: u16,
    ) -> Result<JsonStream<T>, ClientError> {
        let endpoint = endpoint_name(&request);
        let response = self.send(request.streaming()).await?;
        let stream = open_stream(response, &endpoint, expected).await?;
        Ok(stream.max_buffer(self.max_json_buffer))
    }

    /// Follow the engine's `/events` feed.
    pub async fn events(&self) -> Result<JsonStream<Value>, ClientError> {
        self.stream_json("/events", 200).await
    }
}

/// The request path without its query, as used in error messages.
fn endpoint_name(request: &WireRequest) -> String {
    let path = request.get_path();
    path.split_once('?').map_or(path, |(path, _)| path).to_owned()
}
