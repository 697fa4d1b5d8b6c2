//! Container engine HTTP client.
//!
//! This crate talks to a Docker-compatible engine over its local Unix socket
//! or over TCP, and decodes the two streaming body formats the engine uses.
//!
//! ## Features
//!
//! - HTTP/1.1 over a Unix domain socket, hand-rolled on tokio
//! - HTTP/1.1 over TCP (and TLS) through hyper
//! - Buffered and streaming responses, chunked transfer decoding
//! - Log stream demultiplexing (`application/vnd.docker.multiplexed-stream`)
//! - Endless JSON feeds (`/events`, pull progress) with cancellation
//! - Interceptors around every call
//!
//! ## Example
//!
//! ```ignore
//! use dockwire_client::{EngineClient, WireRequest};
//!
//! // DOCKER_HOST, then CONTAINER_HOST, then /var/run/docker.sock
//! let client = EngineClient::builder().build()?;
//!
//! client.ping().await?;
//!
//! let containers: serde_json::Value = client
//!     .call_json(WireRequest::get("/containers/json?all=1"), 200)
//!     .await?;
//! ```
//!
//! ## Logs
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! // Whole output of a stopped container
//! let text = client.logs("/containers/web/logs?stdout=1&stderr=1").await?;
//!
//! // Output as it is written
//! let mut logs = client
//!     .follow_logs("/containers/web/logs?stdout=1&stderr=1&follow=1")
//!     .await?;
//! while let Some(text) = logs.next().await {
//!     print!("{}", text?);
//! }
//! ```
//!
//! Use [`LogDemuxer`] instead of [`LogStream`] to keep stdout and stderr
//! apart.
//!
//! ## Cancellation
//!
//! A [`JsonStream`] never ends on its own while the engine keeps the
//! connection open. It stops when:
//! - it is dropped
//! - [`JsonStream::close`] is called
//! - a [`CancelHandle`] taken from it is cancelled, from any task
//!
//! All three release the connection; a consumer waiting in `next()` wakes
//! up and sees the end of the stream.
//!
//! ```ignore
//! let mut events = client.events().await?;
//! let cancel = events.cancel_handle();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     cancel.cancel();
//! });
//!
//! while let Some(event) = events.next().await {
//!     println!("{}", event?);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `tls` (default): `tls-ring` plus `tls-native-roots`
//! - `tls-ring` / `tls-aws-lc`: rustls crypto provider
//! - `tls-native-roots` / `tls-webpki-roots`: root certificates for `https`
//! - `tracing` (default): debug and trace events for calls and stream
//!   endings
//!
//! ## Modules
//!
//! - [`transport`]: Unix socket and hyper transports
//! - [`response`]: Responses and streaming bodies
//! - [`demux`]: Log frame demultiplexing
//! - [`streaming`]: JSON feeds
//! - [`interceptor`]: Wrapping the send path

mod builder;
mod client;
pub mod demux;
mod error;
pub mod interceptor;
mod request;
pub mod response;
pub mod streaming;
pub mod transport;

pub use builder::{ClientBuildError, ClientBuilder, DEFAULT_SOCKET, EngineHost, HOST_ENV_VARS};
pub use client::EngineClient;
pub use demux::{LogChunk, LogDemuxer, LogStream, demultiplex};
pub use error::ClientError;
pub use interceptor::{FnInterceptor, HeaderInterceptor, Interceptor, InterceptorChain, Next, SendFn};
pub use request::{ResponseMode, WireRequest};
pub use response::{Body, BodyStream, MAX_ERROR_BODY, WireResponse};
pub use streaming::{CancelHandle, DEFAULT_MAX_BUFFER, JsonStream, open_stream};
pub use transport::{HyperTransport, Transport, UnixTransport};

// Re-export the wire types users see in responses
pub use dockwire_core::{Charset, LogFormat, StreamType};
