//! Symmetric sealing of envelope payloads.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Length of the symmetric session key in bytes (AES-128).
pub const SESSION_KEY_LEN: usize = 16;

const IV_LEN: usize = 16;

/// Generate a fresh 16-byte session key from the system CSPRNG.
pub fn generate_session_key() -> [u8; SESSION_KEY_LEN] {
    let mut key = [0u8; SESSION_KEY_LEN];
    getrandom::getrandom(&mut key).expect("getrandom");
    key
}

/// A sealed payload ready for the envelope: the `{ct, sig}` trailer plus the
/// IV that goes into the envelope's `iv` field.
pub struct Sealed {
    /// `{ct_len:u32 ct sig_len:u32 sig}`.
    pub payload: Vec<u8>,
    /// The fresh IV used for this envelope.
    pub iv: [u8; IV_LEN],
}

/// Per-session symmetric crypto state.
///
/// Immutable after the handshake: the mode of a session never changes. One
/// instance is shared by a session's send and receive paths.
pub struct SessionCrypto {
    key: [u8; SESSION_KEY_LEN],
    signer: RsaPrivateKey,
    verifier: RsaPublicKey,
}

impl SessionCrypto {
    /// Assemble session crypto from the exchanged parts.
    ///
    /// `signer` is our private key, `verifier` the peer's public key.
    pub fn new(key: [u8; SESSION_KEY_LEN], signer: RsaPrivateKey, verifier: RsaPublicKey) -> Self {
        Self { key, signer, verifier }
    }

    /// Encrypt and sign `plaintext` for one envelope.
    ///
    /// A fresh IV is generated per call; the signature covers
    /// `SHA-256(ciphertext ‖ iv)` so any bit flip in either is detected.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        getrandom::getrandom(&mut iv).expect("getrandom");

        let ciphertext = Aes128CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|_| CryptoError::InvalidIv { len: iv.len() })?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let digest = digest_for_signature(&ciphertext, &iv);
        let signature = self.signer.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)?;

        let mut payload = Vec::with_capacity(8 + ciphertext.len() + signature.len());
        payload.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
        payload.extend_from_slice(&ciphertext);
        payload.extend_from_slice(&(signature.len() as u32).to_le_bytes());
        payload.extend_from_slice(&signature);

        Ok(Sealed { payload, iv })
    }

    /// Verify and decrypt one envelope's payload.
    ///
    /// Verification happens before decryption; a forged ciphertext never
    /// reaches the cipher.
    pub fn open(&self, payload: &[u8], iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if iv.len() != IV_LEN {
            return Err(CryptoError::InvalidIv { len: iv.len() });
        }
        let (ciphertext, signature) = split_trailer(payload)?;

        let digest = digest_for_signature(ciphertext, iv);
        self.verifier
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .map_err(|_| CryptoError::SignatureMismatch)?;

        Aes128CbcDec::new_from_slices(&self.key, iv)
            .map_err(|_| CryptoError::InvalidIv { len: iv.len() })?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Padding)
    }
}

fn digest_for_signature(ciphertext: &[u8], iv: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(ciphertext);
    hasher.update(iv);
    hasher.finalize().to_vec()
}

fn split_trailer(payload: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    let read_len = |at: usize| -> Option<usize> {
        let bytes: [u8; 4] = payload.get(at..at + 4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes) as usize)
    };
    let ct_len = read_len(0).ok_or(CryptoError::TrailerFormat)?;
    let ciphertext = payload.get(4..4 + ct_len).ok_or(CryptoError::TrailerFormat)?;
    let sig_len = read_len(4 + ct_len).ok_or(CryptoError::TrailerFormat)?;
    let signature =
        payload.get(8 + ct_len..8 + ct_len + sig_len).ok_or(CryptoError::TrailerFormat)?;
    if 8 + ct_len + sig_len != payload.len() {
        return Err(CryptoError::TrailerFormat);
    }
    Ok((ciphertext, signature))
}

// ─── Session-key transport ───────────────────────────────────────────────────

/// Wrap the session key with the peer's public key (RSA-OAEP, SHA-256).
pub fn wrap_session_key(
    peer: &RsaPublicKey,
    key: &[u8; SESSION_KEY_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let mut rng = rand::thread_rng();
    Ok(peer.encrypt(&mut rng, Oaep::new::<Sha256>(), key)?)
}

/// Unwrap a session key with our private key.
pub fn unwrap_session_key(
    own: &RsaPrivateKey,
    wrapped: &[u8],
) -> Result<[u8; SESSION_KEY_LEN], CryptoError> {
    let key = own.decrypt(Oaep::new::<Sha256>(), wrapped)?;
    let len = key.len();
    key.try_into().map_err(|_| CryptoError::InvalidSessionKey { len })
}
