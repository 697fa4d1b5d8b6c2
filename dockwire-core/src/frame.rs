//! Engine log stream framing.
//!
//! Containers without a TTY have their stdout and stderr multiplexed onto a
//! single response body. Each payload is preceded by an 8-byte header:
//!
//! ```text
//! [stream:1][reserved:3][length:4][payload:length]
//! ```
//!
//! The length is a big-endian `u32`. This module provides constants and
//! functions for working with these frames.

use std::fmt;

use crate::error::FrameError;

/// Fixed size of a log frame header.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload slice handed out by a single read of a frame body.
pub const MAX_PAYLOAD_CHUNK: usize = 1024;

/// Content type of a multiplexed (framed) log stream.
pub const MULTIPLEXED_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.multiplexed-stream";

/// Content type of a raw (unframed, TTY) log stream.
pub const RAW_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.raw-stream";

/// Which standard stream a frame belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StreamType {
    /// Get the wire byte for this stream type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Get the name of this stream type.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Stdin => "stdin",
            StreamType::Stdout => "stdout",
            StreamType::Stderr => "stderr",
        }
    }
}

impl TryFrom<u8> for StreamType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StreamType::Stdin),
            1 => Ok(StreamType::Stdout),
            2 => Ok(StreamType::Stderr),
            other => Err(FrameError::UnknownStreamType(other)),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a log body is laid out, from its `Content-Type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Back-to-back frames carrying stdout and stderr.
    Multiplexed,
    /// Unframed TTY output.
    Raw,
}

impl LogFormat {
    /// Match the MIME type of `content_type`, ignoring parameters and case.
    /// `None` for anything that is not a log stream.
    pub fn from_content_type(content_type: Option<&str>) -> Option<Self> {
        let mime = content_type?.split(';').next()?.trim();
        if mime.eq_ignore_ascii_case(MULTIPLEXED_STREAM_CONTENT_TYPE) {
            Some(LogFormat::Multiplexed)
        } else if mime.eq_ignore_ascii_case(RAW_STREAM_CONTENT_TYPE) {
            Some(LogFormat::Raw)
        } else {
            None
        }
    }
}

/// A decoded log frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub stream: StreamType,
    pub length: u32,
}

/// Parse a frame header from the first eight bytes of `data`.
///
/// # Errors
/// Returns an error if fewer than eight bytes are available or the stream
/// type byte is unknown. The reserved bytes are not checked.
pub fn parse_frame_header(data: &[u8]) -> Result<FrameHeader, FrameError> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::IncompleteHeader {
            expected: FRAME_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let stream = StreamType::try_from(data[0])?;
    let length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    Ok(FrameHeader { stream, length })
}

/// Wrap a payload in a log frame.
///
/// # Panics
/// Panics if the payload is longer than `u32::MAX` bytes.
pub fn encode_frame(stream: StreamType, payload: &[u8]) -> Vec<u8> {
    let length = u32::try_from(payload.len()).expect("log frame payload exceeds u32::MAX");

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.push(stream.as_byte());
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
