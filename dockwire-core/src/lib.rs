//! Sans-IO wire types for the dockwire container engine client.
//!
//! This crate provides the protocol pieces shared by every transport in
//! `dockwire-client`; nothing here performs I/O.
//!
//! ## Modules
//!
//! - [`frame`]: Log stream frame layout and header parsing
//! - [`http1`]: HTTP/1.1 response heads and chunked transfer decoding
//! - [`charset`]: Charset resolution and incremental text decoding
//! - `error`: Error types for the parsers above, re-exported at the root

pub mod charset;
mod error;
pub mod frame;
pub mod http1;

pub use charset::{Charset, TextDecoder};
pub use error::*;
pub use frame::{
    FRAME_HEADER_SIZE, FrameHeader, LogFormat, MAX_PAYLOAD_CHUNK,
    MULTIPLEXED_STREAM_CONTENT_TYPE, RAW_STREAM_CONTENT_TYPE, StreamType, encode_frame,
    parse_frame_header,
};
pub use http1::{ChunkedDecoder, ResponseHead};
