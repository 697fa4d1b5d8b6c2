//! HTTP/1.1 response head parsing and chunked body decoding.
//!
//! The engine speaks plain HTTP/1.1 over its Unix socket. Only the response
//! side is parsed here; requests are serialized by the client transport.
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: application/json\r\n
//! \r\n
//! {"ID":"..."}
//! ```

use bytes::{Buf, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::error::{ChunkedError, HeadError};

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Blank line separating the head from the body.
pub const HEAD_BOUNDARY: &[u8] = b"\r\n\r\n";

/// Default upper bound for a response head read off a streaming connection.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Upper bound for a single chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 4 * 1024;

/// A parsed response status line and header block.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    /// Protocol version after `HTTP/`, e.g. `1.1`.
    pub version: String,
    pub status: u16,
    /// Reason phrase; may be empty.
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Whether the body uses chunked transfer-encoding.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// The declared `Content-Type`, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Find the start of the head/body boundary.
pub fn find_head_end(data: &[u8]) -> Option<usize> {
    find(data, HEAD_BOUNDARY)
}

/// Parse a status line of the form `HTTP/<ver> <code> <reason...>`.
pub fn parse_status_line(line: &[u8]) -> Result<(String, u16, String), HeadError> {
    let malformed = || HeadError::StatusLine(String::from_utf8_lossy(line).into_owned());

    let line = std::str::from_utf8(line).map_err(|_| malformed())?;
    let rest = line.strip_prefix("HTTP/").ok_or_else(malformed)?;

    let (version, rest) = rest.split_once(' ').ok_or_else(malformed)?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return Err(malformed());
    }

    let (code, reason) = match rest.split_once(' ') {
        Some((code, reason)) => (code, reason),
        None => (rest, ""),
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let status = code.parse().map_err(|_| malformed())?;

    Ok((version.to_owned(), status, reason.trim_end().to_owned()))
}

/// Parse a response head (status line plus header lines, without the
/// trailing blank line).
pub fn parse_head(head: &[u8]) -> Result<ResponseHead, HeadError> {
    let mut lines = split_lines(head);

    let status_line = lines.next().unwrap_or_default();
    let (version, status, reason) = parse_status_line(status_line)?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let malformed = || HeadError::Header(String::from_utf8_lossy(line).into_owned());

        let colon = line.iter().position(|&b| b == b':').ok_or_else(malformed)?;
        let name = HeaderName::from_bytes(trim_ascii(&line[..colon])).map_err(|_| malformed())?;
        let value = HeaderValue::from_bytes(trim_ascii(&line[colon + 1..])).map_err(|_| malformed())?;
        headers.append(name, value);
    }

    Ok(ResponseHead {
        version,
        status,
        reason,
        headers,
    })
}

/// Split a complete raw response into its head and body.
///
/// The body is everything after the first blank line, untouched.
pub fn split_response(raw: &[u8]) -> Result<(ResponseHead, &[u8]), HeadError> {
    // The status line is checked first so that garbage without a boundary
    // reports the more useful error.
    let first_line_end = find(raw, CRLF).unwrap_or(raw.len());
    parse_status_line(&raw[..first_line_end])?;

    let boundary = find_head_end(raw).ok_or(HeadError::MissingBoundary)?;
    let head = parse_head(&raw[..boundary])?;
    Ok((head, &raw[boundary + HEAD_BOUNDARY.len()..]))
}

/// Strip trailing CR and LF bytes.
pub fn trim_line_terminators(body: &[u8]) -> &[u8] {
    let end = body
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |i| i + 1);
    &body[..end]
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies.
///
/// Feed raw body bytes into a [`BytesMut`] and call [`decode`](Self::decode)
/// until it returns `Ok(None)`; consumed bytes are removed from the front of
/// the buffer, anything incomplete is left in place.
#[derive(Debug, Default)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ChunkState {
    #[default]
    Size,
    Data {
        remaining: u64,
    },
    DataEnd,
    Trailers,
    Done,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminating zero-size chunk and trailers were seen.
    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Whether the decoder stopped at a point where a truncated body can be
    /// accepted: between chunks or inside the trailer section.
    pub fn at_boundary(&self) -> bool {
        matches!(
            self.state,
            ChunkState::Size | ChunkState::Trailers | ChunkState::Done
        )
    }

    /// Decode the next piece of chunk data from `src`.
    ///
    /// Returns `Ok(None)` when more input is needed or the body is complete.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ChunkedError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(eol) = take_line(src)? else {
                        return Ok(None);
                    };
                    let size = parse_chunk_size(&eol)?;
                    self.state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = usize::try_from(remaining).unwrap_or(usize::MAX).min(src.len());
                    let data = src.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining: left }
                    };
                    return Ok(Some(data));
                }
                ChunkState::DataEnd => {
                    if src.len() < CRLF.len() {
                        return Ok(None);
                    }
                    if &src[..CRLF.len()] != CRLF {
                        return Err(ChunkedError::MissingTerminator);
                    }
                    src.advance(CRLF.len());
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }
}

/// Decode a complete chunked body.
///
/// A body cut off between chunks (for example after trailing line
/// terminators were stripped) is accepted; one cut off inside chunk data is
/// not.
pub fn decode_chunked(body: &[u8]) -> Result<Bytes, ChunkedError> {
    let mut src = BytesMut::from(body);
    let mut decoder = ChunkedDecoder::new();
    let mut out = BytesMut::with_capacity(body.len());

    while let Some(data) = decoder.decode(&mut src)? {
        out.extend_from_slice(&data);
    }

    if decoder.is_done() {
        return Ok(out.freeze());
    }
    // Whatever is left must be a partial size line ("0" without CRLF).
    let leftover = trim_ascii(&src);
    if decoder.at_boundary() && leftover.iter().all(|b| b.is_ascii_hexdigit()) {
        Ok(out.freeze())
    } else {
        Err(ChunkedError::Truncated)
    }
}

fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ChunkedError> {
    match find(src, CRLF) {
        Some(eol) => {
            let line = src.split_to(eol);
            src.advance(CRLF.len());
            Ok(Some(line))
        }
        None if src.len() > MAX_CHUNK_LINE => Err(ChunkedError::LineTooLong {
            limit: MAX_CHUNK_LINE,
        }),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ChunkedError> {
    let invalid = || ChunkedError::InvalidSize(String::from_utf8_lossy(line).into_owned());

    // Chunk extensions (";name=value") are ignored.
    let size = line.split(|&b| b == b';').next().unwrap_or_default();
    let size = std::str::from_utf8(trim_ascii(size)).map_err(|_| invalid())?;
    if size.is_empty() {
        return Err(invalid());
    }
    u64::from_str_radix(size, 16).map_err(|_| invalid())
}

fn split_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(data);
    std::iter::from_fn(move || {
        let current = rest?;
        match find(current, CRLF) {
            Some(eol) => {
                rest = Some(&current[eol + CRLF.len()..]);
                Some(&current[..eol])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_ascii(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &data[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line(b"HTTP/1.1 404 Not Found").unwrap();
        assert_eq!(version, "1.1");
        assert_eq!(status, 404);
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn test_parse_status_line_without_reason() {
        let (_, status, reason) = parse_status_line(b"HTTP/1.0 204").unwrap();
        assert_eq!(status, 204);
        assert_eq!(reason, "");
    }

    #[test]
    fn test_parse_status_line_rejects_garbage() {
        assert!(parse_status_line(b"garbage").is_err());
        assert!(parse_status_line(b"HTTP/1.1 2000 OK").is_err());
        assert!(parse_status_line(b"HTTP/1.1 abc OK").is_err());
        assert!(parse_status_line(b"HTTP/x 200 OK").is_err());
        assert!(parse_status_line(b"").is_err());
    }

    #[test]
    fn test_split_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Two: a\r\nX-Two: b\r\n\r\n{\"a\":1}\r\n";
        let (head, body) = split_response(raw).unwrap();

        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "OK");
        assert_eq!(head.content_type(), Some("application/json"));
        assert_eq!(head.headers.get_all("x-two").iter().count(), 2);
        assert_eq!(body, b"{\"a\":1}\r\n");
        assert_eq!(trim_line_terminators(body), b"{\"a\":1}");
    }

    #[test]
    fn test_split_response_missing_boundary() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n";
        assert_eq!(split_response(raw).unwrap_err(), HeadError::MissingBoundary);
    }

    #[test]
    fn test_split_response_bad_status_line() {
        let raw = b"SSH-2.0-OpenSSH\r\n\r\n";
        assert!(matches!(
            split_response(raw).unwrap_err(),
            HeadError::StatusLine(_)
        ));
    }

    #[test]
    fn test_parse_head_malformed_header() {
        let result = parse_head(b"HTTP/1.1 200 OK\r\nno colon here");
        assert!(matches!(result.unwrap_err(), HeadError::Header(_)));
    }

    #[test]
    fn test_is_chunked() {
        let head = parse_head(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, Chunked").unwrap();
        assert!(head.is_chunked());

        let head = parse_head(b"HTTP/1.1 200 OK\r\nContent-Length: 3").unwrap();
        assert!(!head.is_chunked());
    }

    #[test]
    fn test_trim_only_terminators() {
        assert_eq!(trim_line_terminators(b"\r\n\r\n"), b"");
        assert_eq!(trim_line_terminators(b"abc \n"), b"abc ");
    }

    #[test]
    fn test_decode_chunked() {
        let body = b"5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(body).unwrap(), Bytes::from("hello world"));
    }

    #[test]
    fn test_decode_chunked_trimmed_tail() {
        // Trailing CRLFs stripped before decoding leave a bare "0".
        let body = b"3\r\nabc\r\n0";
        assert_eq!(decode_chunked(body).unwrap(), Bytes::from("abc"));
    }

    #[test]
    fn test_decode_chunked_truncated_data() {
        let body = b"a\r\nabc";
        assert_eq!(decode_chunked(body).unwrap_err(), ChunkedError::Truncated);
    }

    #[test]
    fn test_decode_chunked_invalid_size() {
        let body = b"zz\r\nabc\r\n";
        assert!(matches!(
            decode_chunked(body).unwrap_err(),
            ChunkedError::InvalidSize(_)
        ));
    }

    #[test]
    fn test_chunked_decoder_incremental() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::new();
        let mut out = Vec::new();

        for piece in [&b"4\r\nwi"[..], b"ki\r", b"\n5\r\npedia\r\n0\r\n", b"\r\n"] {
            src.extend_from_slice(piece);
            while let Some(data) = decoder.decode(&mut src).unwrap() {
                out.extend_from_slice(&data);
            }
        }

        assert_eq!(out, b"wikipedia");
        assert!(decoder.is_done());
        assert!(src.is_empty());
    }

    #[test]
    fn test_chunked_decoder_missing_terminator() {
        let mut decoder = ChunkedDecoder::new();
        let mut src = BytesMut::from(&b"2\r\nokXX"[..]);

        assert_eq!(decoder.decode(&mut src).unwrap(), Some(Bytes::from("ok")));
        assert_eq!(
            decoder.decode(&mut src).unwrap_err(),
            ChunkedError::MissingTerminator
        );
    }
}
