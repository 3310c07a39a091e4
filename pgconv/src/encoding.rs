//! Client text encoding.
use bytes::{BufMut, Bytes, BytesMut};
use std::str::FromStr;

use crate::{Error, Result};

/// Text encoding of the client connection, `client_encoding` in postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// ISO 8859-1, every char maps to a single byte.
    Latin1,
}

impl TextEncoding {
    /// Returns the number of bytes `text` encodes into.
    ///
    /// Returns [`UnsupportedError`][crate::error::UnsupportedError] when `text`
    /// cannot be represented.
    pub fn encoded_len(&self, text: &str) -> Result<usize> {
        match self {
            Self::Utf8 => Ok(text.len()),
            Self::Latin1 => {
                let mut len = 0;
                for ch in text.chars() {
                    if ch as u32 > 0xFF {
                        return Err(Error::unsupported(format!("character {ch:?} cannot be encoded as LATIN1")));
                    }
                    len += 1;
                }
                Ok(len)
            }
        }
    }

    /// Decode bytes into string.
    pub fn decode(&self, bytes: Bytes) -> Result<String> {
        match self {
            Self::Utf8 => Ok(String::from_utf8(bytes.into())?),
            Self::Latin1 => Ok(bytes.iter().map(|b|*b as char).collect()),
        }
    }

    /// Postgres name of the encoding.
    pub const fn pg_name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF8",
            Self::Latin1 => "LATIN1",
        }
    }
}

impl FromStr for TextEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "UTF8" | "UNICODE" => Ok(Self::Utf8),
            "LATIN1" | "ISO88591" => Ok(Self::Latin1),
            _ => Err(Error::unsupported(format!("unsupported client encoding {s:?}"))),
        }
    }
}

/// Resumable text encoder.
///
/// Tracks how much of the source text has been written so encoding can stop at
/// a full buffer and continue after a flush, never splitting a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoder {
    encoding: TextEncoding,
    offset: usize,
}

impl TextEncoder {
    pub const fn new(encoding: TextEncoding) -> TextEncoder {
        TextEncoder { encoding, offset: 0 }
    }

    /// Returns the byte offset into the source text already encoded.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns `true` if the whole `text` has been encoded.
    pub fn is_complete(&self, text: &str) -> bool {
        self.offset == text.len()
    }

    /// Encode as much of `text` as fit in `max` bytes into `dst`.
    ///
    /// Returns the number of bytes written.
    pub fn encode_into(&mut self, text: &str, dst: &mut BytesMut, max: usize) -> Result<usize> {
        let rest = &text[self.offset..];
        match self.encoding {
            TextEncoding::Utf8 => {
                let mut n = rest.len().min(max);
                while !rest.is_char_boundary(n) {
                    n -= 1;
                }
                dst.put_slice(&rest.as_bytes()[..n]);
                self.offset += n;
                Ok(n)
            }
            TextEncoding::Latin1 => {
                let mut n = 0;
                for ch in rest.chars().take(max) {
                    let Ok(byte) = u8::try_from(ch as u32) else {
                        return Err(Error::unsupported(format!("character {ch:?} cannot be encoded as LATIN1")));
                    };
                    dst.put_u8(byte);
                    self.offset += ch.len_utf8();
                    n += 1;
                }
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn utf8_encoder_never_splits_chars() {
        let text = "aé€";
        let mut enc = TextEncoder::new(TextEncoding::Utf8);
        let mut dst = BytesMut::new();

        assert_eq!(enc.encode_into(text, &mut dst, 2).unwrap(), 1);
        assert_eq!(enc.encode_into(text, &mut dst, 2).unwrap(), 2);
        assert_eq!(enc.encode_into(text, &mut dst, 2).unwrap(), 0);
        assert_eq!(enc.encode_into(text, &mut dst, 3).unwrap(), 3);
        assert!(enc.is_complete(text));
        assert_eq!(&dst[..], text.as_bytes());
    }

    #[test]
    fn latin1() {
        let enc = TextEncoding::Latin1;
        assert_eq!(enc.encoded_len("café").unwrap(), 4);
        assert!(enc.encoded_len("€").unwrap_err().is_unsupported());

        let mut encoder = TextEncoder::new(enc);
        let mut dst = BytesMut::new();
        encoder.encode_into("café", &mut dst, 10).unwrap();
        assert_eq!(&dst[..], b"caf\xe9");
        assert_eq!(enc.decode(dst.freeze()).unwrap(), "café");
    }

    #[test]
    fn parse_client_encoding() {
        assert_eq!("utf-8".parse::<TextEncoding>().unwrap(), TextEncoding::Utf8);
        assert_eq!("LATIN1".parse::<TextEncoding>().unwrap(), TextEncoding::Latin1);
        assert!("SJIS".parse::<TextEncoding>().is_err());
    }
}
