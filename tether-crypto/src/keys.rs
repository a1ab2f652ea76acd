//! RSA keypair generation and public-key exchange encoding.

use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::CryptoError;

/// An RSA keypair owned by one peer for the lifetime of a connection.
///
/// The private half signs outgoing envelopes and (on the client) unwraps the
/// session key; the public half travels to the peer during the hello
/// exchange as PKCS#1 DER.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh keypair of `bits` modulus size.
    ///
    /// Key generation is CPU-bound and can take seconds at 4096 bits; callers
    /// should do it once per connection, off any latency-sensitive path.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// The public half, PKCS#1 DER encoded for the wire.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self.public.to_pkcs1_der()?.as_bytes().to_vec())
    }

    /// Borrow the private half.
    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Borrow the public half.
    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Split into the private half, consuming the pair.
    pub fn into_private(self) -> RsaPrivateKey {
        self.private
    }
}

/// Decode a peer's public key from PKCS#1 DER bytes.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    Ok(RsaPublicKey::from_pkcs1_der(der)?)
}
