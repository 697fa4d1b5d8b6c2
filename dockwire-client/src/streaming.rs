//! Infinite JSON feeds.
//!
//! This module provides [`JsonStream`], which turns a live response body that
//! carries back-to-back JSON documents (the `/events` feed, pull and build
//! progress) into a stream of decoded values.
//!
//! # Cancellation
//!
//! A feed such as `/events` never ends on its own. Stop it by dropping the
//! stream, calling [`JsonStream::close`], or cancelling a [`CancelHandle`]
//! from another task. Each releases the connection exactly once, and a
//! consumer waiting on the next value wakes up to an end of stream.
//!
//! ```ignore
//! let mut events = client.events().await?;
//! let handle = events.cancel_handle();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     handle.cancel();
//! });
//!
//! while let Some(event) = events.next().await {
//!     println!("{}", event?);
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::response::BodyStream;
use crate::{ClientError, WireResponse};

/// Default cap on bytes buffered while waiting for one value to complete.
pub const DEFAULT_MAX_BUFFER: usize = 16 * 1024 * 1024;

/// Cancels a [`JsonStream`] from anywhere.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A stream of JSON values read from a live response body.
///
/// Bytes are accumulated in one buffer and each value is parsed from the
/// front of it, so a value split across any number of reads decodes the same
/// as one that arrived whole. Whitespace between values is skipped.
///
/// The stream ends cleanly when the engine closes the body with nothing but
/// whitespace left over, or when it is cancelled. It fails with
/// [`ClientError::Decode`] on malformed JSON, on a value cut off by the end of
/// the body, or when buffered bytes exceed the limit; connection failures keep
/// their [`ClientError::Connection`] kind. Nothing is yielded after an error.
pub struct JsonStream<T = serde_json::Value> {
    body: Option<BodyStream>,
    buffer: BytesMut,
    max_buffer: usize,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStream<T> {
    /// Decode values from `body`.
    pub fn new(body: BodyStream) -> Self {
        Self::with_token(body, CancellationToken::new())
    }

    /// Decode values from `body` until `token` is cancelled.
    ///
    /// Pass a child of an application-wide token to tie the feed to a wider
    /// shutdown.
    pub fn with_token(body: BodyStream, token: CancellationToken) -> Self {
        Self {
            body: Some(body),
            buffer: BytesMut::new(),
            max_buffer: DEFAULT_MAX_BUFFER,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// Cap the bytes buffered for one incomplete value.
    pub fn max_buffer(mut self, limit: usize) -> Self {
        self.max_buffer = limit;
        self
    }

    /// A handle that cancels this stream.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Stop the stream and release the connection. Returns `true` if this
    /// call released it.
    pub fn close(&mut self) -> bool {
        self.finished = true;
        self.token.cancel();
        self.release()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn release(&mut self) -> bool {
        self.buffer.clear();
        self.body.take().is_some()
    }

    fn fail(&mut self, err: ClientError) -> Poll<Option<Result<T, ClientError>>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %err, "JSON stream failed");

        self.finished = true;
        self.release();
        Poll::Ready(Some(Err(err)))
    }
}

impl<T: DeserializeOwned> JsonStream<T> {
    /// Parse one value from the front of the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds only whitespace or the start
    /// of a value that needs more bytes. A top-level number that ends exactly
    /// at the end of the buffer counts as needing more bytes until the body
    /// closes.
    fn decode_buffered(&mut self) -> Result<Option<T>, ClientError> {
        let leading = self
            .buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buffer.advance(leading);
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let (result, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<T>();
            let result = values.next();
            (result, values.byte_offset())
        };

        match result {
            // A number running to the end of the buffer may continue in the
            // next read.
            Some(Ok(_))
                if self.body.is_some()
                    && ends_in_number(&self.buffer[..consumed], self.buffer.len()) =>
            {
                Ok(None)
            }
            Some(Ok(value)) => {
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(ClientError::Decode(format!("JSON decoding failed: {e}"))),
            None => Ok(None),
        }
    }
}

/// Whether `value`, a parsed prefix of a buffer of `buffered` bytes, is a
/// number that reaches the buffer's end.
fn ends_in_number(value: &[u8], buffered: usize) -> bool {
    value.len() == buffered && value.last().is_some_and(u8::is_ascii_digit)
}

impl<T: DeserializeOwned> Stream for JsonStream<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if this.cancelled.as_mut().poll(cx).is_ready() {
                #[cfg(feature = "tracing")]
                tracing::debug!("JSON stream cancelled");

                this.finished = true;
                this.release();
                return Poll::Ready(None);
            }

            match this.decode_buffered() {
                Ok(Some(value)) => return Poll::Ready(Some(Ok(value))),
                Ok(None) => {}
                Err(e) => return this.fail(e),
            }

            let Some(body) = this.body.as_mut() else {
                this.finished = true;
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let err = ClientError::Decode(format!(
                    "body ended inside a JSON value ({} bytes buffered)",
                    this.buffer.len()
                ));
                return this.fail(err);
            };

            match body.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if this.buffer.len() + bytes.len() > this.max_buffer {
                        let err = ClientError::Decode(format!(
                            "buffered JSON exceeds {} bytes",
                            this.max_buffer
                        ));
                        return this.fail(err);
                    }
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    if this.token.is_cancelled() {
                        // An artifact of tearing the connection down.
                        this.finished = true;
                        this.release();
                        return Poll::Ready(None);
                    }
                    return this.fail(e);
                }
                // Whatever is buffered gets one more parse before the end
                // is judged.
                Poll::Ready(None) => this.body = None,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T> Drop for JsonStream<T> {
    fn drop(&mut self) {
        // Wakes any task waiting on a cloned handle's token.
        self.token.cancel();
    }
}

impl<T> std::fmt::Debug for JsonStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStream")
            .field("buffered", &self.buffer.len())
            .field("max_buffer", &self.max_buffer)
            .field("finished", &self.finished)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Open a JSON feed on `response`.
///
/// Fails with [`ClientError::UnexpectedStatus`] if the status is not
/// `expected`; in that case the error body has been read and the connection
/// released, and no streaming is attempted.
pub async fn open_stream<T: DeserializeOwned>(
    response: WireResponse,
    endpoint: &str,
    expected: u16,
) -> Result<JsonStream<T>, ClientError> {
    let response = response.expect_status(endpoint, expected).await?;
    Ok(JsonStream::new(response.into_body().into_stream()))
}
