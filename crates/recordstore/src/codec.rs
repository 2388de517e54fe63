//! Caller-supplied value codecs and the little-endian wire helpers they
//! build on.
//!
//! The store itself treats record payloads as opaque bytes; every operation
//! that touches a typed value takes a [`Codec`] so the caller decides the
//! representation. All integers on the wire are little-endian.

use crate::error::DecodeError;

/// Encodes and decodes one value type.
///
/// Implementations must round-trip: `decode(encode(v)) == v`.
pub trait Codec<T> {
    fn encode(&self, value: &T, out: &mut Vec<u8>);
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

/// Identity codec for raw byte payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytes;

impl Codec<Vec<u8>> for RawBytes {
    fn encode(&self, value: &Vec<u8>, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(bytes.to_vec())
    }
}

/// A cursor over a byte slice with checked little-endian reads.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! get_le {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty, DecodeError> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.get_bytes(N)?;
            Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
        }
    };
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::BufferTooShort {
                needed: n - self.remaining(),
                had: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.get_bytes(1)?[0])
    }

    get_le!(get_u16, u16);
    get_le!(get_u32, u32);
    get_le!(get_u64, u64);
    get_le!(get_i8, i8);
    get_le!(get_i16, i16);
    get_le!(get_i32, i32);
    get_le!(get_i64, i64);
    get_le!(get_f32, f32);
    get_le!(get_f64, f64);

    pub fn get_u128(&mut self) -> Result<u128, DecodeError> {
        let bytes = self.get_bytes(16)?;
        Ok(u128::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Fails with [`DecodeError::TrailingBytes`] unless the cursor consumed
    /// the whole buffer.
    pub fn expect_end(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reader_le_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        buf.extend_from_slice(&(-7i64).to_le_bytes());
        buf.extend_from_slice(&1.5f64.to_le_bytes());

        let mut r = Reader::new(&buf);
        assert_eq!(r.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.get_i64().unwrap(), -7);
        assert_eq!(r.get_f64().unwrap(), 1.5);
        r.expect_end().unwrap();
    }

    #[test]
    fn reader_short_buffer() {
        let mut r = Reader::new(&[1, 2]);
        assert_eq!(
            r.get_u32(),
            Err(DecodeError::BufferTooShort { needed: 2, had: 2 })
        );
    }
}
