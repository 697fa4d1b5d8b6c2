//! Client-side error types.
//!
//! This module provides [`ClientError`], the error type for every engine call.

use dockwire_core::{ChunkedError, FrameError, HeadError};

/// Errors produced while talking to the engine.
///
/// Payloads are plain strings so the error stays `Clone` and can be handed
/// to every consumer of a failed stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket open, write or read failure, including timeouts.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed status line, header block, head/body boundary or chunk
    /// framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The engine answered with a status other than the one the endpoint
    /// promises.
    #[error("{endpoint}: unexpected status {actual} (expected {expected}): {body}")]
    UnexpectedStatus {
        endpoint: String,
        actual: u16,
        expected: u16,
        body: String,
    },

    /// Request body encoding error.
    #[error("encode error: {0}")]
    Encode(String),

    /// Frame or JSON decoding error that more input cannot fix.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Wrap an I/O error with what was being attempted.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        ClientError::Connection(format!("{context}: {err}"))
    }

    /// Whether this is a connection-level failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    /// The status code of an [`UnexpectedStatus`](ClientError::UnexpectedStatus) error.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::UnexpectedStatus { actual, .. } => Some(*actual),
            _ => None,
        }
    }

    /// The error body the engine sent with an unexpected status.
    pub fn body(&self) -> Option<&str> {
        match self {
            ClientError::UnexpectedStatus { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        match self {
            ClientError::UnexpectedStatus { body, .. } => body,
            ClientError::Connection(msg)
            | ClientError::Protocol(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg) => msg,
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<HeadError> for ClientError {
    fn from(err: HeadError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<ChunkedError> for ClientError {
    fn from(err: ChunkedError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_accessors() {
        let err = ClientError::UnexpectedStatus {
            endpoint: "/events".into(),
            actual: 500,
            expected: 200,
            body: r#"{"message":"boom"}"#.into(),
        };

        assert_eq!(err.status(), Some(500));
        assert_eq!(err.body(), Some(r#"{"message":"boom"}"#));
        assert!(!err.is_connection());
        assert_eq!(
            err.to_string(),
            r#"/events: unexpected status 500 (expected 200): {"message":"boom"}"#
        );
    }

    #[test]
    fn test_io_is_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ClientError::io("connect /run/engine.sock", io);

        assert!(err.is_connection());
        assert_eq!(err.status(), None);
        assert!(err.message().starts_with("connect /run/engine.sock"));
    }

    #[test]
    fn test_core_error_conversions() {
        let err: ClientError = FrameError::UnknownStreamType(9).into();
        assert!(matches!(err, ClientError::Decode(_)));

        let err: ClientError = HeadError::MissingBoundary.into();
        assert!(matches!(err, ClientError::Protocol(_)));

        let err: ClientError = ChunkedError::Truncated.into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
