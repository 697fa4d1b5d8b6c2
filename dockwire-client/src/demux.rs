//! Log stream demultiplexing.
//!
//! Container logs and attach streams arrive as back-to-back frames, each an
//! eight byte header followed by its payload:
//!
//! ```text
//! [stream:1][reserved:3][length:4 big-endian][payload:length]
//! ```
//!
//! This module provides:
//! - [`LogDemuxer`]: yields [`LogChunk`]s with stdout and stderr kept apart
//! - [`LogStream`]: yields decoded text, stdout and stderr interleaved in
//!   arrival order
//! - [`demultiplex`]: reads a whole log body into one string
//!
//! Stdin frames are consumed and dropped. Containers started with a TTY send
//! `application/vnd.docker.raw-stream` bodies with no framing at all; those
//! bytes pass through as stdout.

use std::cmp::min;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use dockwire_core::{
    Charset, FRAME_HEADER_SIZE, LogFormat, MAX_PAYLOAD_CHUNK, StreamType, TextDecoder,
    parse_frame_header,
};
use futures::{Stream, StreamExt};

use crate::response::BodyStream;
use crate::{ClientError, WireResponse};

/// A slice of one stream's output.
///
/// A frame larger than 1024 bytes is delivered as several chunks; a chunk
/// never spans two frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogChunk {
    pub stream: StreamType,
    pub data: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Waiting for a complete frame header.
    Header,
    /// Inside a frame's payload.
    Payload { stream: StreamType, remaining: usize },
    /// No framing; everything is stdout.
    Raw,
}

/// Stream adapter that splits a framed log body into [`LogChunk`]s.
///
/// The frame length is trusted as sent. The body ending between frames, in
/// the middle of a header, or in the middle of a payload all end the stream
/// cleanly once the bytes that did arrive have been yielded. An unknown
/// stream type is a decode error and ends the stream.
pub struct LogDemuxer<S = BodyStream> {
    /// `None` once the body has ended, failed, or been closed.
    stream: Option<S>,
    buffer: BytesMut,
    state: State,
    failed: bool,
}

impl LogDemuxer<BodyStream> {
    /// Demultiplex a response body, choosing framed or raw mode from its
    /// content type. Bodies that declare neither log format are treated as
    /// framed.
    pub fn from_response(response: WireResponse) -> Self {
        let format = LogFormat::from_content_type(response.content_type());
        let body = response.into_body().into_stream();
        match format {
            Some(LogFormat::Raw) => Self::raw(body),
            Some(LogFormat::Multiplexed) | None => Self::new(body),
        }
    }
}

impl<S> LogDemuxer<S> {
    /// Demultiplex a framed byte stream.
    pub fn new(stream: S) -> Self {
        Self::with_state(stream, State::Header)
    }

    /// Pass an unframed byte stream through as stdout.
    pub fn raw(stream: S) -> Self {
        Self::with_state(stream, State::Raw)
    }

    fn with_state(stream: S, state: State) -> Self {
        Self {
            stream: Some(stream),
            buffer: BytesMut::new(),
            state,
            failed: false,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.state == State::Raw
    }

    /// Release the underlying body. Returns `true` if this call released it.
    pub fn close(&mut self) -> bool {
        self.stream.take().is_some()
    }

    /// Take the next chunk out of the buffer, if one is available.
    fn next_buffered(&mut self) -> Result<Option<LogChunk>, ClientError> {
        loop {
            match self.state {
                State::Raw => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = min(self.buffer.len(), MAX_PAYLOAD_CHUNK);
                    return Ok(Some(LogChunk {
                        stream: StreamType::Stdout,
                        data: self.buffer.split_to(take).freeze(),
                    }));
                }
                State::Header => {
                    if self.buffer.len() < FRAME_HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = parse_frame_header(&self.buffer[..FRAME_HEADER_SIZE])?;
                    self.buffer.advance(FRAME_HEADER_SIZE);
                    self.state = State::Payload {
                        stream: header.stream,
                        remaining: header.length as usize,
                    };
                }
                State::Payload { remaining: 0, .. } => self.state = State::Header,
                State::Payload { stream, remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = min(min(remaining, self.buffer.len()), MAX_PAYLOAD_CHUNK);
                    let data = self.buffer.split_to(take).freeze();
                    self.state = State::Payload {
                        stream,
                        remaining: remaining - take,
                    };
                    if stream != StreamType::Stdin {
                        return Ok(Some(LogChunk { stream, data }));
                    }
                }
            }
        }
    }
}

impl<S> Stream for LogDemuxer<S>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    type Item = Result<LogChunk, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.failed {
                return Poll::Ready(None);
            }

            match this.next_buffered() {
                Ok(Some(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                Ok(None) => {}
                Err(e) => {
                    this.failed = true;
                    this.close();
                    return Poll::Ready(Some(Err(e)));
                }
            }

            let Some(stream) = this.stream.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.failed = true;
                    this.close();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    #[cfg(feature = "tracing")]
                    if let State::Payload { remaining, .. } = this.state
                        && remaining > 0
                    {
                        tracing::debug!(remaining, "log body ended inside a frame");
                    }
                    this.stream = None;
                    this.buffer.clear();
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> std::fmt::Debug for LogDemuxer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDemuxer")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

/// Decoded log text, stdout and stderr interleaved in arrival order.
///
/// Multi-byte characters split across frames or reads are reassembled; bytes
/// that are not valid in the charset become U+FFFD.
pub struct LogStream<S = BodyStream> {
    demuxer: LogDemuxer<S>,
    decoder: TextDecoder,
    finished: bool,
}

impl LogStream<BodyStream> {
    /// Decode a response body using the charset its headers declare.
    pub fn from_response(response: WireResponse) -> Self {
        let charset = response.charset();
        Self::new(LogDemuxer::from_response(response), charset)
    }
}

impl<S> LogStream<S> {
    pub fn new(demuxer: LogDemuxer<S>, charset: Charset) -> Self {
        Self {
            demuxer,
            decoder: TextDecoder::new(charset),
            finished: false,
        }
    }

    /// Decode with `charset` instead of the one the response declared.
    pub fn charset(mut self, charset: Charset) -> Self {
        self.decoder = TextDecoder::new(charset);
        self
    }

    /// Release the underlying body. Returns `true` if this call released it.
    pub fn close(&mut self) -> bool {
        self.finished = true;
        self.demuxer.close()
    }
}

impl<S> Stream for LogStream<S>
where
    S: Stream<Item = Result<Bytes, ClientError>> + Unpin,
{
    type Item = Result<String, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match this.demuxer.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let text = this.decoder.decode_chunk(&chunk.data);
                    if !text.is_empty() {
                        return Poll::Ready(Some(Ok(text)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    let tail = this.decoder.finish();
                    if tail.is_empty() {
                        return Poll::Ready(None);
                    }
                    return Poll::Ready(Some(Ok(tail)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> std::fmt::Debug for LogStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("charset", &self.decoder.charset())
            .field("demuxer", &self.demuxer)
            .finish()
    }
}

/// Read a whole log body and return its stdout and stderr text.
pub async fn demultiplex(response: WireResponse) -> Result<String, ClientError> {
    let mut stream = LogStream::from_response(response);
    let mut out = String::new();
    while let Some(text) = stream.next().await {
        out.push_str(&text?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Body;
    use dockwire_core::encode_frame;
    use http::{HeaderMap, HeaderValue, header};

    fn body(parts: Vec<Vec<u8>>) -> BodyStream {
        BodyStream::new(futures::stream::iter(
            parts.into_iter().map(|p| Ok(Bytes::from(p))).collect::<Vec<_>>(),
        ))
    }

    fn response(content_type: Option<&'static str>, parts: Vec<Vec<u8>>) -> WireResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        WireResponse::new(200, "OK", headers, Body::Streaming(body(parts)))
    }

    async fn chunks(parts: Vec<Vec<u8>>) -> Vec<LogChunk> {
        LogDemuxer::new(body(parts))
            .map(|chunk| chunk.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_single_stdout_frame() {
        let mut raw = vec![1, 0, 0, 0, 0, 0, 0, 5];
        raw.extend_from_slice(b"hello");

        let text = demultiplex(response(None, vec![raw])).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_stdin_frames_are_dropped() {
        let mut raw = encode_frame(StreamType::Stdin, b"xyz");
        raw.extend(encode_frame(StreamType::Stderr, b"oops"));

        let text = demultiplex(response(None, vec![raw])).await.unwrap();
        assert_eq!(text, "oops");
    }

    #[tokio::test]
    async fn test_streams_kept_apart() {
        let mut raw = encode_frame(StreamType::Stdout, b"out\n");
        raw.extend(encode_frame(StreamType::Stderr, b"err\n"));
        raw.extend(encode_frame(StreamType::Stdout, b"more\n"));

        let got = chunks(vec![raw]).await;
        let streams: Vec<_> = got.iter().map(|c| c.stream).collect();
        assert_eq!(
            streams,
            vec![StreamType::Stdout, StreamType::Stderr, StreamType::Stdout]
        );
        assert_eq!(got[1].data, Bytes::from("err\n"));
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let mut raw = encode_frame(StreamType::Stdout, b"hello");
        raw.extend(encode_frame(StreamType::Stderr, b"world"));

        // Every split point, including inside both headers.
        for split in 1..raw.len() {
            let parts = vec![raw[..split].to_vec(), raw[split..].to_vec()];
            let text = demultiplex(response(None, parts)).await.unwrap();
            assert_eq!(text, "helloworld", "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_large_payload_is_chunked() {
        let payload = vec![b'a'; MAX_PAYLOAD_CHUNK * 2 + 10];
        let mut raw = encode_frame(StreamType::Stdout, &payload);
        raw.extend(encode_frame(StreamType::Stderr, b"next"));

        let got = chunks(vec![raw]).await;
        let sizes: Vec<_> = got.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, vec![MAX_PAYLOAD_CHUNK, MAX_PAYLOAD_CHUNK, 10, 4]);
        assert_eq!(got[3].stream, StreamType::Stderr);
    }

    #[tokio::test]
    async fn test_zero_length_frames_continue() {
        let mut raw = encode_frame(StreamType::Stdout, b"");
        raw.extend(encode_frame(StreamType::Stderr, b""));
        raw.extend(encode_frame(StreamType::Stdout, b"after"));

        let text = demultiplex(response(None, vec![raw])).await.unwrap();
        assert_eq!(text, "after");
    }

    #[tokio::test]
    async fn test_truncated_header_ends_cleanly() {
        let mut raw = encode_frame(StreamType::Stdout, b"done");
        raw.extend_from_slice(&[1, 0, 0]);

        let text = demultiplex(response(None, vec![raw])).await.unwrap();
        assert_eq!(text, "done");
    }

    #[tokio::test]
    async fn test_truncated_payload_keeps_what_arrived() {
        let mut raw = vec![1, 0, 0, 0, 0, 0, 0, 10];
        raw.extend_from_slice(b"part");

        let text = demultiplex(response(None, vec![raw])).await.unwrap();
        assert_eq!(text, "part");
    }

    #[tokio::test]
    async fn test_unknown_stream_type_is_decode_error() {
        let raw = vec![7, 0, 0, 0, 0, 0, 0, 1, b'x'];
        let mut demuxer = LogDemuxer::new(body(vec![raw]));

        let err = demuxer.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(demuxer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_raw_stream_passes_through() {
        let text = demultiplex(response(
            Some("application/vnd.docker.raw-stream"),
            vec![b"\x01not a frame".to_vec()],
        ))
        .await
        .unwrap();
        assert_eq!(text, "\u{1}not a frame");
    }

    #[tokio::test]
    async fn test_utf8_split_across_frames() {
        let snowman = "☃".as_bytes();
        let mut raw = encode_frame(StreamType::Stdout, &snowman[..1]);
        raw.extend(encode_frame(StreamType::Stdout, &snowman[1..]));

        let stream = LogStream::from_response(response(None, vec![raw])).charset(Charset::Utf8);
        let texts: Vec<_> = stream.map(|t| t.unwrap()).collect().await;
        assert_eq!(texts, vec!["☃".to_owned()]);
    }

    #[tokio::test]
    async fn test_latin1_default_decodes_every_byte() {
        let raw = encode_frame(StreamType::Stdout, &[0xE9, 0xFF]);
        let text = demultiplex(response(None, vec![raw])).await.unwrap();
        assert_eq!(text, "éÿ");
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let raw = encode_frame(StreamType::Stdout, b"ignored");
        let mut stream = LogStream::from_response(response(None, vec![raw]));

        assert!(stream.close());
        assert!(!stream.close());
        assert!(stream.next().await.is_none());
    }
}
