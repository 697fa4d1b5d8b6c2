//! Wire-level error types.
//!
//! This module provides the error types produced by the sans-IO parsers:
//! - [`FrameError`]: Log frame header errors
//! - [`HeadError`]: HTTP/1.1 response head errors
//! - [`ChunkedError`]: Chunked transfer-encoding errors

/// Log frame header errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Fewer than eight header bytes were available.
    #[error("incomplete frame header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    /// The stream type byte is not stdin, stdout or stderr.
    #[error("unknown stream type: 0x{0:02x}")]
    UnknownStreamType(u8),
}

/// HTTP/1.1 response head errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HeadError {
    /// The status line does not look like `HTTP/<ver> <code> <reason>`.
    #[error("malformed status line: {0:?}")]
    StatusLine(String),

    /// No blank line separates the headers from the body.
    #[error("missing header/body boundary")]
    MissingBoundary,

    /// The head grew past the configured limit without a boundary.
    #[error("response head exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// A header line has no colon or an invalid name/value.
    #[error("malformed header line: {0:?}")]
    Header(String),
}

/// Chunked transfer-encoding errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChunkedError {
    /// The chunk size line is not a hexadecimal number.
    #[error("invalid chunk size: {0:?}")]
    InvalidSize(String),

    /// A chunk's data was not followed by CRLF.
    #[error("chunk data not terminated by CRLF")]
    MissingTerminator,

    /// A chunk size or trailer line grew past the line limit.
    #[error("chunk line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The body ended in the middle of a chunk.
    #[error("chunked body truncated")]
    Truncated,
}
