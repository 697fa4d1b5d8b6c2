//! Engine responses.
//!
//! This module provides [`WireResponse`], the parsed status, headers and body
//! of one engine call. The body is either fully buffered ([`Body::Full`]) or
//! an open stream over the live connection ([`Body::Streaming`]).

mod body;

pub use body::{BodyStream, Dechunked};

use bytes::Bytes;
use dockwire_core::{Charset, LogFormat};
use dockwire_core::http1::{self, ResponseHead};
use http::{HeaderMap, header};
use serde::de::DeserializeOwned;

use crate::ClientError;

/// Upper bound on how much of an error body is read before giving up on it.
pub const MAX_ERROR_BODY: usize = 64 * 1024;

/// A response body.
#[derive(Debug)]
pub enum Body {
    /// Everything the engine sent, already read.
    Full(Bytes),
    /// The connection is still open; bytes arrive as they are read.
    Streaming(BodyStream),
}

impl Body {
    /// Turn the body into a stream; a buffered body yields one chunk.
    pub fn into_stream(self) -> BodyStream {
        match self {
            Body::Full(data) => BodyStream::from_bytes(data),
            Body::Streaming(stream) => stream,
        }
    }

    /// Read the body into memory.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        match self {
            Body::Full(data) => Ok(data),
            Body::Streaming(stream) => stream.collect().await,
        }
    }
}

/// A response from the engine.
#[derive(Debug)]
pub struct WireResponse {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body: Body,
}

impl WireResponse {
    pub fn new(status: u16, reason: impl Into<String>, headers: HeaderMap, body: Body) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
            body,
        }
    }

    /// Build a response from a parsed head and a body.
    pub fn from_head(head: ResponseHead, body: Body) -> Self {
        Self::new(head.status, head.reason, head.headers, body)
    }

    /// Parse a complete raw response read off a closed connection.
    ///
    /// The body is everything after the first blank line, de-chunked when the
    /// engine used chunked transfer-encoding, with trailing line terminators
    /// trimmed unless the body is a log stream.
    pub fn from_raw(raw: &[u8]) -> Result<Self, ClientError> {
        let (head, body) = http1::split_response(raw)?;

        let body = if head.is_chunked() {
            http1::decode_chunked(body)?
        } else {
            Bytes::copy_from_slice(body)
        };
        let body = trim_buffered(&head.headers, body);

        Ok(Self::from_head(head, Body::Full(body)))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// The charset text bodies should be decoded with.
    pub fn charset(&self) -> Charset {
        Charset::for_content_type(self.content_type())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Split into headers and body.
    pub fn into_parts(self) -> (HeaderMap, Body) {
        (self.headers, self.body)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes, ClientError> {
        self.body.bytes().await
    }

    /// Read the whole body as text in its declared charset.
    pub async fn text(self) -> Result<String, ClientError> {
        let charset = self.charset();
        let data = self.body.bytes().await?;
        Ok(charset.decode(&data))
    }

    /// Read the whole body as one JSON document.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let data = self.body.bytes().await?;
        serde_json::from_slice(&data)
            .map_err(|e| ClientError::Decode(format!("JSON decoding failed: {e}")))
    }

    /// Check the status against what `endpoint` promises.
    ///
    /// On a mismatch the error body is read (bounded by [`MAX_ERROR_BODY`]),
    /// the connection is released, and an
    /// [`UnexpectedStatus`](ClientError::UnexpectedStatus) error is returned.
    pub async fn expect_status(self, endpoint: &str, expected: u16) -> Result<Self, ClientError> {
        if self.status == expected {
            return Ok(self);
        }

        let charset = self.charset();
        let actual = self.status;
        let body = match self.body {
            Body::Full(data) => Ok(data),
            Body::Streaming(stream) => stream.collect_limited(MAX_ERROR_BODY).await,
        };
        let body = match body {
            Ok(data) => charset.decode(http1::trim_line_terminators(&data)),
            // The status is the failure worth reporting.
            Err(e) => format!("<error body unreadable: {e}>"),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint, actual, expected, "unexpected engine status");

        Err(ClientError::UnexpectedStatus {
            endpoint: endpoint.to_owned(),
            actual,
            expected,
            body,
        })
    }
}

/// Drop trailing line terminators from a buffered body. Log stream bodies
/// are binary frames and are returned untouched.
pub(crate) fn trim_buffered(headers: &HeaderMap, body: Bytes) -> Bytes {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if LogFormat::from_content_type(content_type).is_some() {
        return body;
    }
    let len = http1::trim_line_terminators(&body).len();
    body.slice(..len)
}
