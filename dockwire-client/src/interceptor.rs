//! Interceptors for engine calls.
//!
//! The send path is a plain async function from [`WireRequest`] to
//! [`WireResponse`]. An interceptor wraps that function in another one, so
//! it can rewrite the request, inspect the response, or short-circuit the
//! call entirely. Typical uses:
//! - Adding registry credentials (`X-Registry-Auth`)
//! - Logging and timing
//! - Mapping engine errors
//!
//! # Example
//!
//! ```ignore
//! use dockwire_client::{EngineClient, HeaderInterceptor};
//!
//! let auth = HeaderInterceptor::try_new("x-registry-auth", &encoded_credentials)?;
//!
//! let client = EngineClient::builder()
//!     .with_interceptor(auth)
//!     .build()?;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use http::{HeaderName, HeaderValue};

use crate::{ClientError, WireRequest, WireResponse};

/// The signature of one engine call.
///
/// Interceptors wrap this function to add logic before and after the call.
pub type SendFn =
    Arc<dyn Fn(WireRequest) -> BoxFuture<'static, Result<WireResponse, ClientError>> + Send + Sync>;

/// The rest of the chain, handed to a [`FnInterceptor`].
///
/// Call this to proceed to the next interceptor or the transport.
#[derive(Clone)]
pub struct Next {
    inner: SendFn,
}

impl Next {
    pub(crate) fn new(inner: SendFn) -> Self {
        Self { inner }
    }

    /// Call the next interceptor or the transport.
    pub async fn call(self, request: WireRequest) -> Result<WireResponse, ClientError> {
        (self.inner)(request).await
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Wraps the send function with extra behaviour.
///
/// For the common case of adding a header, use [`HeaderInterceptor`]; for
/// anything that needs the response, use [`FnInterceptor`].
pub trait Interceptor: Send + Sync {
    /// Wrap `next`. The default passes through unchanged.
    fn wrap_send(&self, next: SendFn) -> SendFn {
        next
    }
}

/// Interceptors applied in the order they were added.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Wrap `next` with every interceptor in the chain.
    ///
    /// The first interceptor added is the first to see the request and the
    /// last to see the response.
    pub fn wrap_send(&self, next: SendFn) -> SendFn {
        self.interceptors
            .iter()
            .rev()
            .fold(next, |wrapped, interceptor| interceptor.wrap_send(wrapped))
    }
}

/// Sets a fixed header on every request, replacing any earlier value.
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderInterceptor {
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    /// Parse and validate the header from strings.
    pub fn try_new(name: &str, value: &str) -> Result<Self, ClientError> {
        let name = name
            .parse()
            .map_err(|_| ClientError::Encode(format!("invalid header name: {name}")))?;
        let value = value
            .parse()
            .map_err(|_| ClientError::Encode(format!("invalid header value: {value}")))?;
        Ok(Self { name, value })
    }
}

impl Interceptor for HeaderInterceptor {
    fn wrap_send(&self, next: SendFn) -> SendFn {
        let name = self.name.clone();
        let value = self.value.clone();
        Arc::new(move |request: WireRequest| next(request.header(name.clone(), value.clone())))
    }
}

/// An interceptor built from a closure around the rest of the chain.
///
/// # Example
///
/// ```ignore
/// use dockwire_client::{FnInterceptor, Next, WireRequest};
///
/// let timing = FnInterceptor::new(|request: WireRequest, next: Next| {
///     Box::pin(async move {
///         let started = std::time::Instant::now();
///         let path = request.get_path().to_owned();
///         let result = next.call(request).await;
///         println!("{path} took {:?}", started.elapsed());
///         result
///     })
/// });
/// ```
#[derive(Clone)]
pub struct FnInterceptor<F> {
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(WireRequest, Next) -> BoxFuture<'static, Result<WireResponse, ClientError>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(WireRequest, Next) -> BoxFuture<'static, Result<WireResponse, ClientError>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    fn wrap_send(&self, next: SendFn) -> SendFn {
        let func = self.func.clone();
        Arc::new(move |request: WireRequest| func(request, Next::new(next.clone())))
    }
}
