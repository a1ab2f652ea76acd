//! The typed wire envelope — the only message shape on the wire.
//!
//! Field order when length-prefixed:
//!
//! ```text
//! message_type:str  error:u8  correlation_id:bytes  iv:bytes  payload:bytes
//! ```
//!
//! Strings and byte strings use a little-endian `u32` length prefix.

use std::fmt;

use tether_proto::deserialize::{self, Cursor, Deserializable};
use tether_proto::serialize::Serializable;

// ─── MessageKind ─────────────────────────────────────────────────────────────

/// The recognized envelope types.
///
/// Unknown types on the wire decode fine ([`WireMessage::message_type`] is a
/// plain string); receivers log and discard them without tearing the session
/// down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Handshake opener; also the server's handshake reply.
    Hello,
    /// Client credentials.
    Auth,
    /// Server authentication verdict.
    AuthResponse,
    /// A method call.
    Call,
    /// A method result (or fault, with the envelope `error` flag set).
    Result,
    /// A server-originated callback invocation.
    Delegate,
    /// Graceful session close.
    Goodbye,
    /// An unsolicited error notification.
    Error,
}

impl MessageKind {
    /// The wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Auth => "auth",
            Self::AuthResponse => "auth_response",
            Self::Call => "call",
            Self::Result => "result",
            Self::Delegate => "delegate",
            Self::Goodbye => "goodbye",
            Self::Error => "error",
        }
    }

    /// The inverse of [`MessageKind::as_str`].
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "hello" => Self::Hello,
            "auth" => Self::Auth,
            "auth_response" => Self::AuthResponse,
            "call" => Self::Call,
            "result" => Self::Result,
            "delegate" => Self::Delegate,
            "goodbye" => Self::Goodbye,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── WireMessage ─────────────────────────────────────────────────────────────

/// One envelope as carried by a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct WireMessage {
    /// The envelope type string; see [`MessageKind`].
    pub message_type: String,
    /// Set when the payload is a fault record instead of the normal payload.
    pub error: bool,
    /// 16 bytes linking a call to its response; empty for unsolicited
    /// messages.
    pub correlation_id: Vec<u8>,
    /// AES IV; empty iff the session is plaintext.
    pub iv: Vec<u8>,
    /// The (possibly sealed) serialized message.
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// A plaintext envelope of `kind`.
    pub fn plain(kind: MessageKind, correlation_id: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            message_type: kind.as_str().to_owned(),
            error: false,
            correlation_id,
            iv: Vec::new(),
            payload,
        }
    }

    /// The recognized kind, if this is one.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_str(&self.message_type)
    }

    /// Serialize to frame-payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            16 + self.message_type.len()
                + self.correlation_id.len()
                + self.iv.len()
                + self.payload.len(),
        );
        self.message_type.serialize(&mut buf);
        self.error.serialize(&mut buf);
        self.correlation_id.serialize(&mut buf);
        self.iv.serialize(&mut buf);
        self.payload.serialize(&mut buf);
        buf
    }

    /// Decode from frame-payload bytes, rejecting trailing garbage.
    pub fn decode(bytes: &[u8]) -> deserialize::Result<Self> {
        let mut cursor = Cursor::from_slice(bytes);
        let message = Self {
            message_type: String::deserialize(&mut cursor)?,
            error: bool::deserialize(&mut cursor)?,
            correlation_id: Vec::<u8>::deserialize(&mut cursor)?,
            iv: Vec::<u8>::deserialize(&mut cursor)?,
            payload: Vec::<u8>::deserialize(&mut cursor)?,
        };
        if cursor.remaining() != 0 {
            return Err(deserialize::Error::LengthOutOfRange {
                declared: bytes.len(),
                remaining: cursor.remaining(),
            });
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_round_trip() {
        let kinds = [
            MessageKind::Hello,
            MessageKind::Auth,
            MessageKind::AuthResponse,
            MessageKind::Call,
            MessageKind::Result,
            MessageKind::Delegate,
            MessageKind::Goodbye,
            MessageKind::Error,
        ];
        for kind in kinds {
            assert_eq!(MessageKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_str("ping"), None);
    }

    #[test]
    fn field_order_is_fixed() {
        let envelope = WireMessage {
            message_type: "call".into(),
            error: true,
            correlation_id: vec![0xAA; 16],
            iv: vec![0xBB; 16],
            payload: vec![0xCC, 0xDD],
        };
        let bytes = envelope.encode();

        // message_type: len + "call"
        assert_eq!(&bytes[..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], b"call");
        // error flag
        assert_eq!(bytes[8], 1);
        // correlation_id: len + 16 bytes
        assert_eq!(&bytes[9..13], &16u32.to_le_bytes());
        assert_eq!(&bytes[13..29], &[0xAA; 16]);
        // iv: len + 16 bytes
        assert_eq!(&bytes[29..33], &16u32.to_le_bytes());
        assert_eq!(&bytes[33..49], &[0xBB; 16]);
        // payload: len + data
        assert_eq!(&bytes[49..53], &2u32.to_le_bytes());
        assert_eq!(&bytes[53..], &[0xCC, 0xDD]);
    }
}
