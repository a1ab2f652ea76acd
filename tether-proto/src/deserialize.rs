//! The [`Deserializable`] trait, [`Cursor`] buffer, and primitive impls.

use std::fmt;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur during deserialization.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Ran out of bytes before the value was fully read.
    UnexpectedEof,
    /// A flag byte held something other than 0 or 1.
    InvalidFlag {
        /// The offending byte.
        value: u8,
    },
    /// A string field did not hold valid UTF-8.
    InvalidUtf8,
    /// A length prefix exceeded the remaining buffer.
    LengthOutOfRange {
        /// The declared length.
        declared: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },
    /// A recursive structure nested deeper than the protocol allows.
    DepthLimitExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of buffer"),
            Self::InvalidFlag { value } => write!(f, "invalid flag byte {value:#04x}"),
            Self::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            Self::LengthOutOfRange { declared, remaining } => {
                write!(f, "declared length {declared} exceeds remaining {remaining} bytes")
            }
            Self::DepthLimitExceeded => write!(f, "nesting depth limit exceeded"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for deserialization.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Cursor ──────────────────────────────────────────────────────────────────

/// A zero-copy cursor over an in-memory byte slice.
///
/// Avoids `std::io::Cursor` and its wide error surface; only the error cases
/// above can ever occur while decoding tether messages.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor positioned at the start of `buf`.
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<u8> {
        match self.buf.get(self.pos).copied() {
            Some(b) => {
                self.pos += 1;
                Ok(b)
            }
            None => Err(Error::UnexpectedEof),
        }
    }

    /// Read exactly `out.len()` bytes.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let end = self.pos + out.len();
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    /// Borrow the next `len` bytes without copying.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::LengthOutOfRange { declared: len, remaining: self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

/// Alias used throughout message decoding: `Buffer<'_, '_>`.
pub type Buffer<'a, 'b> = &'a mut Cursor<'b>;

// ─── Deserializable ──────────────────────────────────────────────────────────

/// Deserialize a value from tether's binary wire format.
pub trait Deserializable: Sized {
    /// Read `Self` from `buf`, advancing its position.
    fn deserialize(buf: Buffer) -> Result<Self>;

    /// Convenience: deserialize from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::from_slice(bytes);
        Self::deserialize(&mut cursor)
    }
}

// ─── Primitives ──────────────────────────────────────────────────────────────

impl Deserializable for bool {
    fn deserialize(buf: Buffer) -> Result<Self> {
        match buf.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(Error::InvalidFlag { value }),
        }
    }
}

impl Deserializable for i32 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 4];
        buf.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }
}

impl Deserializable for u32 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 4];
        buf.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
}

impl Deserializable for i64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }
}

impl Deserializable for u64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }
}

impl Deserializable for f64 {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 8];
        buf.read_exact(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }
}

impl Deserializable for [u8; 16] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut b = [0u8; 16];
        buf.read_exact(&mut b)?;
        Ok(b)
    }
}

// ─── Byte strings / strings ──────────────────────────────────────────────────

impl Deserializable for Vec<u8> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = u32::deserialize(buf)? as usize;
        Ok(buf.read_slice(len)?.to_vec())
    }
}

impl Deserializable for String {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let bytes = Vec::<u8>::deserialize(buf)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }
}

// ─── Sequences ───────────────────────────────────────────────────────────────

impl<T: Deserializable> Deserializable for Vec<T> {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = u32::deserialize(buf)? as usize;
        // Cap pre-allocation at what the buffer could possibly hold.
        let mut items = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            items.push(T::deserialize(buf)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_rejects_reads_past_the_end() {
        let mut cursor = Cursor::from_slice(&[1, 2]);
        let mut out = [0u8; 4];
        assert_eq!(cursor.read_exact(&mut out), Err(Error::UnexpectedEof));
    }

    #[test]
    fn byte_string_length_is_bounded_by_the_buffer() {
        // Declares 100 bytes but only 2 follow.
        let bytes = [100u8, 0, 0, 0, 0xAA, 0xBB];
        match Vec::<u8>::from_bytes(&bytes) {
            Err(Error::LengthOutOfRange { declared: 100, remaining: 2 }) => {}
            other => panic!("expected LengthOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn flag_bytes_must_be_zero_or_one() {
        assert_eq!(bool::from_bytes(&[2]), Err(Error::InvalidFlag { value: 2 }));
        assert_eq!(bool::from_bytes(&[1]), Ok(true));
        assert_eq!(bool::from_bytes(&[0]), Ok(false));
    }

    #[test]
    fn strings_must_be_utf8() {
        // len = 2, then invalid UTF-8.
        let bytes = [2u8, 0, 0, 0, 0xFF, 0xFE];
        assert_eq!(String::from_bytes(&bytes), Err(Error::InvalidUtf8));
    }

    #[test]
    fn read_slice_is_zero_copy_and_advances() {
        let data = [1u8, 2, 3, 4, 5];
        let mut cursor = Cursor::from_slice(&data);
        assert_eq!(cursor.read_slice(3).unwrap(), &[1, 2, 3]);
        assert_eq!(cursor.pos(), 3);
        assert_eq!(cursor.remaining(), 2);
    }
}
