//! Character set resolution and text decoding for response bodies.
//!
//! The charset of a body is taken from, in order:
//! 1. the `charset` parameter of its `Content-Type`
//! 2. the default charset of the MIME type (`application/json` is UTF-8,
//!    `text/*` is ISO-8859-1)
//! 3. ISO-8859-1, which maps every byte to a character and cannot fail

/// Character sets understood by the decoders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    #[default]
    Latin1,
    Ascii,
}

impl Charset {
    /// Look up a charset by its IANA label (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches('"').to_ascii_lowercase();
        match label.as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Some(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "latin1" | "l1" | "cp819" => {
                Some(Charset::Latin1)
            }
            "us-ascii" | "ascii" | "iso646-us" => Some(Charset::Ascii),
            _ => None,
        }
    }

    /// Default charset for a bare MIME type, if the type defines one.
    pub fn default_for_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime == "application/json" || mime.ends_with("+json") {
            Some(Charset::Utf8)
        } else if mime.starts_with("text/") {
            Some(Charset::Latin1)
        } else {
            None
        }
    }

    /// Resolve the charset for a `Content-Type` header value.
    pub fn for_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Charset::default();
        };

        let mut parts = content_type.split(';');
        let mime = parts.next().unwrap_or_default();

        let declared = parts
            .filter_map(|param| param.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
            .and_then(|(_, value)| Charset::from_label(value));

        declared
            .or_else(|| Charset::default_for_mime(mime))
            .unwrap_or_default()
    }

    /// Decode a complete byte slice.
    pub fn decode(self, bytes: &[u8]) -> String {
        let mut decoder = TextDecoder::new(self);
        let mut text = decoder.decode_chunk(bytes);
        text.push_str(&decoder.finish());
        text
    }
}

/// Incremental decoder for text split across arbitrary byte chunks.
///
/// UTF-8 sequences cut at a chunk boundary are held back until the next
/// chunk; invalid sequences become U+FFFD.
#[derive(Debug)]
pub struct TextDecoder {
    charset: Charset,
    pending: Vec<u8>,
}

impl TextDecoder {
    pub fn new(charset: Charset) -> Self {
        Self {
            charset,
            pending: Vec::new(),
        }
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Decode the next chunk, returning all text that is complete so far.
    pub fn decode_chunk(&mut self, bytes: &[u8]) -> String {
        match self.charset {
            Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Charset::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { '\u{FFFD}' })
                .collect(),
            Charset::Utf8 => {
                self.pending.extend_from_slice(bytes);
                let pending = std::mem::take(&mut self.pending);
                let (text, tail) = decode_utf8_prefix(&pending);
                self.pending = tail.to_vec();
                text
            }
        }
    }

    /// Flush any held-back bytes at end of input.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Decode the longest prefix of `input` that is not an incomplete trailing
/// sequence. Returns the text and the held-back tail.
fn decode_utf8_prefix(input: &[u8]) -> (String, &[u8]) {
    let mut text = String::with_capacity(input.len());
    let mut rest = input;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                text.push_str(valid);
                return (text, &[]);
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        text.push('\u{FFFD}');
                        rest = &after[len..];
                    }
                    None => return (text, after),
                }
            }
        }
    }
}
