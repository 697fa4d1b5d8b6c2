//! Unix domain socket transport.
//!
//! This module provides [`UnixTransport`], which speaks HTTP/1.1 directly over
//! a fresh socket connection per call. There is no pooling and no pipelining:
//! every request carries `Connection: close` unless the caller says otherwise,
//! and the end of the response is the end of the connection.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dockwire_core::HeadError;
use dockwire_core::http1::{self, HEAD_BOUNDARY, MAX_HEAD_SIZE};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use http::{HeaderValue, header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tower_service::Service;

use super::Transport;
use crate::response::{Body, BodyStream, Dechunked};
use crate::{ClientError, WireRequest, WireResponse};

/// Bytes requested from the socket per read.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// `Host` sent when the caller sets none. The engine ignores it, but
/// HTTP/1.1 requires one.
const DEFAULT_HOST: &str = "localhost";

/// HTTP over a Unix domain socket.
///
/// # Example
///
/// ```ignore
/// use dockwire_client::transport::UnixTransport;
///
/// let transport = UnixTransport::new("/var/run/docker.sock");
/// let response = transport.request(WireRequest::get("/_ping")).await?;
/// assert_eq!(response.text().await?, "OK");
/// ```
#[derive(Clone)]
pub struct UnixTransport {
    socket_path: PathBuf,
    host: HeaderValue,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    chunk_size: usize,
    max_head_size: usize,
}

impl std::fmt::Debug for UnixTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixTransport")
            .field("socket_path", &self.socket_path)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl UnixTransport {
    /// Create a new transport builder.
    pub fn builder(socket_path: impl Into<PathBuf>) -> UnixTransportBuilder {
        UnixTransportBuilder::new(socket_path)
    }

    /// Create a transport with default settings.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            host: HeaderValue::from_static(DEFAULT_HOST),
            connect_timeout: None,
            read_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_head_size: MAX_HEAD_SIZE,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and receive its response.
    pub async fn request(&self, request: WireRequest) -> Result<WireResponse, ClientError> {
        let request = self.with_default_headers(request);
        let streaming = request.is_streaming();
        let wire = request.encode()?;

        let mut stream = self.connect().await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %request.get_method(),
            path = request.get_path(),
            socket = %self.socket_path.display(),
            streaming,
            "sending request"
        );

        stream
            .write_all(&wire)
            .await
            .map_err(|e| ClientError::io("write request", e))?;

        if streaming {
            self.read_streaming(stream).await
        } else {
            self.read_buffered(stream).await
        }
    }

    /// Fill in `Host`, `Content-Length` and `Connection` where the caller
    /// left them unset.
    fn with_default_headers(&self, request: WireRequest) -> WireRequest {
        let mut request = request.default_header(header::HOST, self.host.clone());
        if let Some(len) = request.get_body().map(Bytes::len) {
            request = request.default_header(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        request.default_header(header::CONNECTION, HeaderValue::from_static("close"))
    }

    async fn connect(&self) -> Result<UnixStream, ClientError> {
        let connect = UnixStream::connect(&self.socket_path);
        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                ClientError::Connection(format!(
                    "connect to {} timed out after {timeout:?}",
                    self.socket_path.display()
                ))
            })?,
            None => connect.await,
        };
        result.map_err(|e| ClientError::io(&format!("connect to {}", self.socket_path.display()), e))
    }

    /// Read until the engine closes the connection, then parse everything.
    async fn read_buffered(&self, mut stream: UnixStream) -> Result<WireResponse, ClientError> {
        let mut raw = BytesMut::new();
        while self.read_some(&mut stream, &mut raw).await? > 0 {}

        #[cfg(feature = "tracing")]
        tracing::trace!(bytes = raw.len(), "response read to EOF");

        WireResponse::from_raw(&raw)
    }

    /// Read only the head; the body is handed back over the open socket.
    async fn read_streaming(&self, mut stream: UnixStream) -> Result<WireResponse, ClientError> {
        let mut buf = BytesMut::new();
        let boundary = loop {
            if let Some(boundary) = http1::find_head_end(&buf) {
                break boundary;
            }
            if buf.len() > self.max_head_size {
                return Err(HeadError::TooLarge {
                    limit: self.max_head_size,
                }
                .into());
            }
            if self.read_some(&mut stream, &mut buf).await? == 0 {
                if buf.is_empty() {
                    return Err(ClientError::Connection(
                        "connection closed before a response was received".into(),
                    ));
                }
                // Surfaces a bad status line ahead of the missing boundary.
                let err = http1::split_response(&buf)
                    .err()
                    .unwrap_or(HeadError::MissingBoundary);
                return Err(err.into());
            }
        };

        let head = http1::parse_head(&buf[..boundary])?;
        let leftover = buf.split_off(boundary + HEAD_BOUNDARY.len()).freeze();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            status = head.status,
            chunked = head.is_chunked(),
            leftover = leftover.len(),
            "response head received"
        );

        let raw = socket_body(stream, leftover, self.chunk_size);
        let body = if head.is_chunked() {
            BodyStream::new(Dechunked::new(Box::pin(raw)))
        } else {
            BodyStream::new(raw)
        };

        Ok(WireResponse::from_head(
            head,
            Body::Streaming(body.read_timeout(self.read_timeout)),
        ))
    }

    /// One read of up to `chunk_size` bytes, bounded by the read timeout.
    async fn read_some(&self, stream: &mut UnixStream, buf: &mut BytesMut) -> Result<usize, ClientError> {
        buf.reserve(self.chunk_size);
        let mut limited = (&mut *stream).take(self.chunk_size as u64);
        let read = limited.read_buf(buf);
        let result = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| ClientError::Connection(format!("read timed out after {timeout:?}")))?,
            None => read.await,
        };
        result.map_err(|e| ClientError::io("read response", e))
    }
}

/// The rest of a response body: bytes already read past the head, then
/// whatever the socket yields until EOF. The socket is dropped when the
/// stream ends or fails.
fn socket_body(
    stream: UnixStream,
    leftover: Bytes,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, ClientError>> + Send + 'static {
    let first = (!leftover.is_empty()).then_some(Ok(leftover));

    let reads = futures::stream::unfold(Some(stream), move |state| async move {
        let mut stream = state?;
        let mut buf = BytesMut::with_capacity(chunk_size);
        match stream.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(stream))),
            Err(e) => Some((Err(ClientError::io("read response body", e)), None)),
        }
    });

    futures::stream::iter(first).chain(reads)
}

impl Transport for UnixTransport {
    fn send(&self, request: WireRequest) -> BoxFuture<'static, Result<WireResponse, ClientError>> {
        let transport = self.clone();
        Box::pin(async move { transport.request(request).await })
    }
}

impl Service<WireRequest> for UnixTransport {
    type Response = WireResponse;
    type Error = ClientError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Every call opens its own connection.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: WireRequest) -> Self::Future {
        self.send(request)
    }
}

/// Builder for [`UnixTransport`].
pub struct UnixTransportBuilder {
    socket_path: PathBuf,
    host: String,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    chunk_size: usize,
    max_head_size: usize,
}

impl UnixTransportBuilder {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            host: DEFAULT_HOST.to_owned(),
            connect_timeout: None,
            read_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_head_size: MAX_HEAD_SIZE,
        }
    }

    /// Set the `Host` header sent when a request carries none.
    ///
    /// Default: `localhost`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Bound the time spent opening the connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound each individual read. For streaming bodies this is the longest
    /// the engine may stay silent, so leave it unset for event feeds that
    /// can be idle indefinitely.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set how many bytes are requested per read.
    ///
    /// Default: 4096. Zero is treated as one.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the largest response head accepted from a streaming request.
    ///
    /// Default: 64 KiB.
    pub fn max_head_size(mut self, size: usize) -> Self {
        self.max_head_size = size;
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<UnixTransport, ClientError> {
        let host = HeaderValue::try_from(self.host.as_str())
            .map_err(|_| ClientError::Encode(format!("invalid host header: {}", self.host)))?;

        Ok(UnixTransport {
            socket_path: self.socket_path,
            host,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            chunk_size: self.chunk_size,
            max_head_size: self.max_head_size,
        })
    }
}

impl std::fmt::Debug for UnixTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixTransportBuilder")
            .field("socket_path", &self.socket_path)
            .field("host", &self.host)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("chunk_size", &self.chunk_size)
            .field("max_head_size", &self.max_head_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Accept one connection, read the request head, reply with `response`
    /// and close. Returns the raw request bytes.
    async fn serve_once(listener: UnixListener, response: &'static [u8]) -> Vec<u8> {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while http1::find_head_end(&request).is_none() {
            let n = conn.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        // The client may hang up early on a bad response.
        let _ = conn.write_all(response).await;
        let _ = conn.shutdown().await;
        request
    }

    #[test]
    fn test_builder_defaults() {
        let builder = UnixTransportBuilder::new("/run/engine.sock");
        assert_eq!(builder.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(builder.max_head_size, MAX_HEAD_SIZE);
        assert!(builder.read_timeout.is_none());

        let transport = builder.chunk_size(0).build().unwrap();
        assert_eq!(transport.chunk_size, 1);
        assert_eq!(transport.socket_path(), Path::new("/run/engine.sock"));
    }

    #[test]
    fn test_builder_rejects_invalid_host() {
        let result = UnixTransportBuilder::new("/run/engine.sock").host("bad\nhost").build();
        assert!(matches!(result, Err(ClientError::Encode(_))));
    }

    #[test]
    fn test_default_headers() {
        let transport = UnixTransport::new("/run/engine.sock");

        let request = transport.with_default_headers(WireRequest::post("/build").body("abc"));
        assert_eq!(request.get_header(&header::HOST).unwrap(), "localhost");
        assert_eq!(request.get_header(&header::CONTENT_LENGTH).unwrap(), "3");
        assert_eq!(request.get_header(&header::CONNECTION).unwrap(), "close");

        let request = transport.with_default_headers(
            WireRequest::get("/events").header(header::CONNECTION, HeaderValue::from_static("keep-alive")),
        );
        assert!(request.get_header(&header::CONTENT_LENGTH).is_none());
        assert_eq!(request.get_header(&header::CONNECTION).unwrap(), "keep-alive");
    }

    #[tokio::test]
    async fn test_unreachable_socket_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = UnixTransport::new(dir.path().join("missing.sock"));

        let err = transport.request(WireRequest::get("/_ping")).await.unwrap_err();
        assert!(err.is_connection(), "{err:?}");
    }

    #[tokio::test]
    async fn test_unsafe_path_rejected_before_connect() {
        let dir = tempfile::tempdir().unwrap();
        let transport = UnixTransport::new(dir.path().join("missing.sock"));

        let request = WireRequest::get("/x HTTP/1.1\r\nX-Evil: 1\r\n\r\nGET /y");
        let err = transport.request(request).await.unwrap_err();
        assert!(matches!(err, ClientError::Encode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_buffered_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nOK\r\n",
        ));

        let transport = UnixTransport::builder(&path).chunk_size(3).build().unwrap();
        let response = transport.request(WireRequest::get("/_ping")).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "OK");

        let request = String::from_utf8(server.await.unwrap()).unwrap();
        assert!(request.starts_with("GET /_ping HTTP/1.1\r\n"));
        assert!(request.contains("host: localhost\r\n"));
        assert!(request.contains("connection: close\r\n"));
    }

    #[tokio::test]
    async fn test_streaming_yields_leftover_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(listener, b"HTTP/1.1 200 OK\r\n\r\nfirst second"));

        let transport = UnixTransport::new(&path);
        let response = transport
            .request(WireRequest::get("/logs").streaming())
            .await
            .unwrap();

        assert!(matches!(response.body(), Body::Streaming(_)));
        assert_eq!(response.bytes().await.unwrap(), Bytes::from("first second"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_streaming_head_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            b"HTTP/1.1 200 OK\r\nX-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n",
        ));

        let transport = UnixTransport::builder(&path)
            .max_head_size(16)
            .chunk_size(8)
            .build()
            .unwrap();
        let err = transport
            .request(WireRequest::get("/events").streaming())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Protocol(_)), "{err:?}");
        server.await.unwrap();
    }
}
