//! Engine requests.
//!
//! [`WireRequest`] is an immutable value: every setter consumes the request
//! and returns a new one, so requests derived from a shared template never
//! observe each other's changes.
//!
//! ```ignore
//! use dockwire_client::WireRequest;
//!
//! let base = WireRequest::post("/containers/create").json_body(&config)?;
//! let named = base.clone().query("name", "web")?;   // `base` is untouched
//! ```

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, header};
use serde::Serialize;

use crate::ClientError;

/// How the transport should deliver the response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseMode {
    /// Read until the engine closes the connection.
    #[default]
    Buffered,
    /// Return as soon as the head is parsed; the body stays on the wire.
    Streaming,
}

/// A single HTTP request to the engine.
#[derive(Clone, Debug)]
pub struct WireRequest {
    method: Method,
    path: String,
    /// Ordered; names are unique (compared case-insensitively).
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Bytes>,
    mode: ResponseMode,
}

impl WireRequest {
    /// Create a request for `path` (origin form, e.g. `/containers/json?all=1`).
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            mode: ResponseMode::Buffered,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    /// Replace the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Replace the target path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set a header. A later value for the same name replaces the earlier one
    /// in its original position.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        match self.headers.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Set a header from strings, validating both.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, ClientError> {
        let name = HeaderName::try_from(name)
            .map_err(|_| ClientError::Encode(format!("invalid header name: {name}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|_| ClientError::Encode(format!("invalid header value: {value}")))?;
        Ok(self.header(name, value))
    }

    /// Set a header only if it is not already present.
    pub fn default_header(self, name: HeaderName, value: HeaderValue) -> Self {
        if self.get_header(&name).is_some() {
            self
        } else {
            self.header(name, value)
        }
    }

    /// Remove a header.
    pub fn remove_header(mut self, name: &HeaderName) -> Self {
        self.headers.retain(|(existing, _)| existing != name);
        self
    }

    /// Set the raw body. No content type is implied.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type`.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, ClientError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ClientError::Encode(format!("JSON encoding failed: {e}")))?;
        Ok(self
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .body(body))
    }

    /// Append a query parameter, percent-encoding the value's reserved bytes.
    pub fn query(mut self, name: &str, value: &str) -> Result<Self, ClientError> {
        if name.is_empty() || name.bytes().any(|b| !is_unreserved(b)) {
            return Err(ClientError::Encode(format!("invalid query name: {name}")));
        }
        let separator = if self.path.contains('?') { '&' } else { '?' };
        self.path.push(separator);
        self.path.push_str(name);
        self.path.push('=');
        for b in value.bytes() {
            if is_unreserved(b) {
                self.path.push(char::from(b));
            } else {
                self.path.push_str(&format!("%{b:02X}"));
            }
        }
        Ok(self)
    }

    /// Ask the transport to hand back the body as an open stream.
    pub fn streaming(mut self) -> Self {
        self.mode = ResponseMode::Streaming;
        self
    }

    pub fn get_method(&self) -> &Method {
        &self.method
    }

    pub fn get_path(&self) -> &str {
        &self.path
    }

    pub fn get_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn get_header(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn get_body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn is_streaming(&self) -> bool {
        self.mode == ResponseMode::Streaming
    }

    /// Check that the path can go on the request line as is.
    ///
    /// It must be non-empty and free of spaces and control bytes, which
    /// would otherwise end the request line early.
    pub fn validate_path(&self) -> Result<(), ClientError> {
        if self.path.is_empty() {
            return Err(ClientError::Encode("empty request path".into()));
        }
        if self.path.bytes().any(|b| b == b' ' || b.is_ascii_control()) {
            return Err(ClientError::Encode(format!(
                "request path contains spaces or control characters: {:?}",
                self.path
            )));
        }
        Ok(())
    }

    /// Serialize to HTTP/1.1 wire bytes: request line, headers, blank line,
    /// body. Headers are written exactly as set.
    pub fn encode(&self) -> Result<Vec<u8>, ClientError> {
        self.validate_path()?;

        let body_len = self.body.as_ref().map_or(0, Bytes::len);
        let mut out = Vec::with_capacity(64 + self.path.len() + self.headers.len() * 32 + body_len);

        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");

        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        Ok(out)
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}
