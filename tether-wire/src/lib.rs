//! Framed wire transport for the tether RPC runtime.
//!
//! This crate handles:
//! * Length-prefixed binary framing over any bidirectional byte stream
//! * The typed wire envelope carried inside every frame
//! * Sealing/opening of envelope payloads for encrypted sessions
//! * The default TCP stream transport, surfaced as a channel pair
//!
//! Message-oriented transports (WebSocket binary frames, in-process queues)
//! carry one envelope per native message and skip the length prefix; they
//! only need to produce the same [`FrameSender`]/[`FrameReceiver`] pair.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod frame;
pub mod sealed;
pub mod transport;

pub use envelope::{MessageKind, WireMessage};
pub use frame::{clamp_max_frame, read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES, HARD_MAX_FRAME_BYTES};
pub use sealed::{open_envelope, seal_envelope};
pub use transport::{connect_tcp, spawn_stream_pump, FrameReceiver, FrameSender};

use std::fmt;
use std::io;

use tether_crypto::CryptoError;
use tether_proto::deserialize;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors produced by the wire layer.
#[derive(Debug)]
pub enum WireError {
    /// The underlying stream failed.
    Io(io::Error),
    /// A frame declared a length above the configured maximum.
    FrameTooLarge {
        /// Declared frame length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// An envelope failed to decode.
    Envelope(deserialize::Error),
    /// Sealing or opening a payload failed.
    Crypto(CryptoError),
    /// An envelope's `iv` presence disagrees with the session's mode.
    EncryptionMismatch {
        /// Whether the session expected an encrypted envelope.
        expected_encrypted: bool,
    },
    /// The connection's pump tasks have shut down.
    ChannelClosed,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "i/o: {e}"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds the {max}-byte limit")
            }
            Self::Envelope(e) => write!(f, "envelope decode: {e}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::EncryptionMismatch { expected_encrypted: true } => {
                write!(f, "plaintext envelope on an encrypted session")
            }
            Self::EncryptionMismatch { expected_encrypted: false } => {
                write!(f, "encrypted envelope on a plaintext session")
            }
            Self::ChannelClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<deserialize::Error> for WireError {
    fn from(e: deserialize::Error) -> Self {
        Self::Envelope(e)
    }
}

impl From<CryptoError> for WireError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}
