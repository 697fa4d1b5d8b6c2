//! Response body streams.
//!
//! This module provides [`BodyStream`], the open, sequentially-readable body
//! handed out by streaming requests, and [`Dechunked`], the adapter that
//! strips `Transfer-Encoding: chunked` framing from a raw byte stream.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dockwire_core::ChunkedDecoder;
use futures::{Stream, StreamExt};
use tokio::time::Sleep;

use crate::ClientError;

type BoxByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// An open response body.
///
/// The body owns the connection it reads from. The connection is released
/// when the peer ends the body, when a read fails, when [`close`](Self::close)
/// is called, or when the body is dropped, whichever comes first; it is
/// released exactly once.
///
/// A read timeout, if set, bounds each individual read rather than the
/// lifetime of the body.
pub struct BodyStream {
    inner: Option<BoxByteStream>,
    read_timeout: Option<Duration>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl BodyStream {
    /// Wrap a byte stream that owns its connection.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
            read_timeout: None,
            sleep: None,
        }
    }

    /// A body that yields `data` once and ends.
    pub fn from_bytes(data: Bytes) -> Self {
        let chunks = if data.is_empty() { None } else { Some(Ok(data)) };
        Self::new(futures::stream::iter(chunks))
    }

    /// Fail a read that sees no data for `timeout`.
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Release the connection. Returns `true` if this call released it and
    /// `false` if it was already gone.
    pub fn close(&mut self) -> bool {
        self.sleep = None;
        self.inner.take().is_some()
    }

    /// Whether the connection has been released.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Read the rest of the body into memory.
    pub async fn collect(mut self) -> Result<Bytes, ClientError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }

    /// Read at most `limit` bytes of the rest of the body, then release the
    /// connection. Used for error bodies, which are small but may arrive on a
    /// connection the engine keeps open.
    pub async fn collect_limited(mut self, limit: usize) -> Result<Bytes, ClientError> {
        let mut out = BytesMut::new();
        while out.len() < limit {
            match self.next().await {
                Some(chunk) => out.extend_from_slice(&chunk?),
                None => break,
            }
        }
        self.close();
        out.truncate(limit);
        Ok(out.freeze())
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sleep = None;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.close();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.close();
                Poll::Ready(None)
            }
            Poll::Pending => {
                let Some(timeout) = this.read_timeout else {
                    return Poll::Pending;
                };
                let sleep = this
                    .sleep
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        this.close();
                        Poll::Ready(Some(Err(ClientError::Connection(format!(
                            "read timed out after {timeout:?}"
                        )))))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("closed", &self.is_closed())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

/// Stream adapter that removes chunked transfer-encoding.
///
/// Ends after the terminating zero-size chunk, dropping the underlying
/// stream. A peer that closes between chunks ends the body cleanly; one that
/// closes inside a chunk is a protocol error.
pub struct Dechunked<S> {
    stream: Option<S>,
    buffer: BytesMut,
    decoder: ChunkedDecoder,
}

impl<S> Dechunked<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            buffer: BytesMut::new(),
            decoder: ChunkedDecoder::new(),
        }
    }
}

impl<S> Stream for Dechunked<S>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    type Item = Result<Bytes, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.decoder.decode(&mut this.buffer) {
                Ok(Some(data)) => return Poll::Ready(Some(Ok(data))),
                Ok(None) if this.decoder.is_done() => {
                    this.stream = None;
                    return Poll::Ready(None);
                }
                Ok(None) => {}
                Err(e) => {
                    this.stream = None;
                    return Poll::Ready(Some(Err(e.into())));
                }
            }

            let Some(stream) = this.stream.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.stream = None;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.stream = None;
                    if this.decoder.at_boundary() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Err(ClientError::Protocol(
                        "connection closed inside a chunk".into(),
                    ))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
