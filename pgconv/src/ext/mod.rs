use bytes::{Buf, Bytes};

use crate::{common::ByteStr, row::DecodeError};

/// Nul terminated strings of backend message bodies.
pub trait BytesExt: Buf {
    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, DecodeError>;
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, DecodeError> {
        let end = self
            .iter()
            .position(|e| matches!(e, b'\0'))
            .ok_or(DecodeError::Truncated)?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(ByteStr::from_utf8(me)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nul_string_and_truncation() {
        let mut b = Bytes::from_static(b"id\0\0\x17");
        assert_eq!(b.get_nul_bytestr().unwrap(), "id");
        assert_eq!(b.get_nul_bytestr().unwrap(), "");
        assert!(matches!(b.get_nul_bytestr(), Err(DecodeError::Truncated)));
        assert_eq!(b.remaining(), 1);
    }
}
