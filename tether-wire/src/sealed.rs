//! Sealing and opening of envelope payloads.
//!
//! The session's mode is fixed at creation: encrypted sessions seal every
//! post-handshake payload and receivers reject any envelope whose `iv`
//! presence disagrees with the mode.

use tether_crypto::SessionCrypto;

use crate::envelope::{MessageKind, WireMessage};
use crate::WireError;

/// Build an outgoing envelope, sealing the payload when `crypto` is present.
pub fn seal_envelope(
    kind: MessageKind,
    correlation_id: Vec<u8>,
    error: bool,
    plaintext: Vec<u8>,
    crypto: Option<&SessionCrypto>,
) -> Result<WireMessage, WireError> {
    let (iv, payload) = match crypto {
        Some(crypto) => {
            let sealed = crypto.seal(&plaintext)?;
            (sealed.iv.to_vec(), sealed.payload)
        }
        None => (Vec::new(), plaintext),
    };
    Ok(WireMessage { message_type: kind.as_str().to_owned(), error, correlation_id, iv, payload })
}

/// Extract an envelope's plaintext payload, opening it when `crypto` is
/// present.
pub fn open_envelope(
    envelope: &WireMessage,
    crypto: Option<&SessionCrypto>,
) -> Result<Vec<u8>, WireError> {
    match (crypto, envelope.iv.is_empty()) {
        (Some(crypto), false) => Ok(crypto.open(&envelope.payload, &envelope.iv)?),
        (Some(_), true) => Err(WireError::EncryptionMismatch { expected_encrypted: true }),
        (None, true) => Ok(envelope.payload.clone()),
        (None, false) => Err(WireError::EncryptionMismatch { expected_encrypted: false }),
    }
}
