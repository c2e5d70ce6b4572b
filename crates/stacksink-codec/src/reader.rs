//! Bounds-checked cursor over a byte slice.
//!
//! Shared by the transaction and Clarity-value decoders. Every read returns
//! `Result`; reading past the end is a `CodecError::UnexpectedEof`.

use crate::error::CodecError;

/// A forward-only cursor over `&[u8]`.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer (for error context).
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn eof(&self, needed: usize) -> CodecError {
        CodecError::UnexpectedEof {
            offset: self.pos,
            needed: needed - self.remaining(),
        }
    }

    /// Read `n` bytes as a slice without copying.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(self.eof(n));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, CodecError> {
        Ok(u128::from_be_bytes(self.read_array()?))
    }

    pub fn read_i128(&mut self) -> Result<i128, CodecError> {
        Ok(i128::from_be_bytes(self.read_array()?))
    }

    /// Read a length-prefixed (u8) name with the Clarity identifier charset:
    /// ASCII letters, digits, `-`, `_`, `?`, `!`.
    pub fn read_clarity_name(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        let name = std::str::from_utf8(bytes)
            .map_err(|e| CodecError::invalid("clarity name", e.to_string()))?;
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'?' | b'!'))
        {
            return Err(CodecError::invalid(
                "clarity name",
                format!("illegal character in {name:?}"),
            ));
        }
        Ok(name.to_string())
    }

    /// Error unless the whole buffer was consumed.
    pub fn expect_eof(&self, what: &'static str) -> Result<(), CodecError> {
        if self.remaining() != 0 {
            return Err(CodecError::TrailingBytes {
                what,
                count: self.remaining(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_integers_big_endian() {
        let mut r = ByteReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0203);
        assert_eq!(r.pos(), 3);
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn eof_is_an_error_not_a_panic() {
        let mut r = ByteReader::new(&[0x01]);
        let err = r.read_u32().unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { offset: 0, .. }));
    }

    #[test]
    fn clarity_name_rejects_illegal_chars() {
        // len=3, "a b": space is not in the identifier charset
        let mut r = ByteReader::new(&[0x03, b'a', b' ', b'b']);
        assert!(r.read_clarity_name().is_err());

        let mut r = ByteReader::new(&[0x04, b'n', b'a', b'm', b'e']);
        assert_eq!(r.read_clarity_name().unwrap(), "name");
    }

    #[test]
    fn expect_eof_reports_trailing() {
        let mut r = ByteReader::new(&[0x00, 0xff]);
        r.read_u8().unwrap();
        let err = r.expect_eof("test").unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { count: 1, .. }));
    }
}
