//! The [`Serializable`] trait and its implementations for primitive types.
//!
//! All multi-byte integers are little-endian. Byte strings and UTF-8 strings
//! are length-prefixed with a `u32`; there is no alignment padding.

/// Serialize `self` into tether's binary wire format.
pub trait Serializable {
    /// Appends the serialized form of `self` to `buf`.
    fn serialize(&self, buf: &mut Vec<u8>);

    /// Convenience: allocate a fresh `Vec<u8>` and serialize into it.
    fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.serialize(&mut v);
        v
    }
}

// ─── booleans / bytes ────────────────────────────────────────────────────────

/// `false` → `0x00`, `true` → `0x01`.
///
/// There is deliberately no `u8` impl: single bytes are always flags, and a
/// `u8` impl would collide with the byte-string impl for `Vec<u8>`.
impl Serializable for bool {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(*self));
    }
}

// ─── integers ────────────────────────────────────────────────────────────────

impl Serializable for i32 {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Serializable for u32 {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Serializable for i64 {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Serializable for u64 {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

impl Serializable for f64 {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }
}

/// Raw 16-byte tokens (session ids, correlation ids, handler keys) are
/// written without a length prefix.
impl Serializable for [u8; 16] {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

// ─── strings / byte strings ──────────────────────────────────────────────────

/// Byte strings: `[len as u32 LE][data]`.
impl Serializable for &[u8] {
    fn serialize(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).serialize(buf);
        buf.extend_from_slice(self);
    }
}

impl Serializable for Vec<u8> {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.as_slice().serialize(buf);
    }
}

impl Serializable for &str {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.as_bytes().serialize(buf);
    }
}

impl Serializable for String {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.as_bytes().serialize(buf);
    }
}

// ─── sequences ───────────────────────────────────────────────────────────────

/// Sequences: `[count as u32 LE][items…]`.
impl<T: Serializable> Serializable for [T] {
    fn serialize(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).serialize(buf);
        for item in self {
            item.serialize(buf);
        }
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.as_slice().serialize(buf);
    }
}
