//! Cryptographic session layer for the tether RPC runtime.
//!
//! Provides:
//! - RSA keypair generation and PKCS#1-DER public-key exchange
//! - RSA-OAEP (SHA-256) wrapping of the 16-byte symmetric session key
//! - AES-128-CBC + PKCS7 sealing with a fresh IV per envelope
//! - Detached RSA PKCS#1 v1.5 signatures over `SHA-256(ciphertext ‖ iv)`
//!
//! The algorithm choices are fixed; nothing here is negotiated on the wire.
//! Asymmetric keys exist only for the handshake (key transport) and for
//! signing; all payload encryption is symmetric.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod keys;
mod secret;

pub use keys::{public_key_from_der, RsaKeyPair};
pub use secret::{
    generate_session_key, unwrap_session_key, wrap_session_key, Sealed, SessionCrypto,
    SESSION_KEY_LEN,
};

use std::fmt;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors from key handling, sealing and opening.
#[derive(Debug)]
pub enum CryptoError {
    /// RSA key generation, encryption or decryption failed.
    Rsa(rsa::Error),
    /// Public-key DER encoding or decoding failed.
    KeyEncoding(rsa::pkcs1::Error),
    /// The IV field does not hold exactly 16 bytes.
    InvalidIv {
        /// Observed length.
        len: usize,
    },
    /// A wrapped session key did not unwrap to exactly 16 bytes.
    InvalidSessionKey {
        /// Observed length.
        len: usize,
    },
    /// The `{ciphertext, signature}` payload trailer is malformed.
    TrailerFormat,
    /// The detached signature does not verify against the peer's key.
    SignatureMismatch,
    /// CBC decryption produced invalid PKCS7 padding.
    Padding,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa(e) => write!(f, "rsa: {e}"),
            Self::KeyEncoding(e) => write!(f, "public key encoding: {e}"),
            Self::InvalidIv { len } => write!(f, "iv must be 16 bytes, got {len}"),
            Self::InvalidSessionKey { len } => {
                write!(f, "session key must be 16 bytes, got {len}")
            }
            Self::TrailerFormat => write!(f, "malformed ciphertext/signature trailer"),
            Self::SignatureMismatch => write!(f, "signature verification failed"),
            Self::Padding => write!(f, "invalid ciphertext padding"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<rsa::Error> for CryptoError {
    fn from(e: rsa::Error) -> Self {
        Self::Rsa(e)
    }
}

impl From<rsa::pkcs1::Error> for CryptoError {
    fn from(e: rsa::pkcs1::Error) -> Self {
        Self::KeyEncoding(e)
    }
}
