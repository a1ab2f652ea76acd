use tether_crypto::{
    generate_session_key, public_key_from_der, unwrap_session_key, wrap_session_key, CryptoError,
    RsaKeyPair, SessionCrypto,
};

// Reduced key size to keep keygen fast; the pipeline is size-independent.
const TEST_KEY_BITS: usize = 1024;

fn peers() -> (SessionCrypto, SessionCrypto) {
    let client = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let server = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let key = generate_session_key();
    let client_side = SessionCrypto::new(key, client.private().clone(), server.public().clone());
    let server_side = SessionCrypto::new(key, server.private().clone(), client.public().clone());
    (client_side, server_side)
}

#[test]
fn seal_open_round_trip() {
    let (client, server) = peers();
    let plaintext = b"the quick brown fox".to_vec();

    let sealed = client.seal(&plaintext).unwrap();
    assert_eq!(sealed.iv.len(), 16);

    let opened = server.open(&sealed.payload, &sealed.iv).unwrap();
    assert_eq!(opened, plaintext);
}

#[test]
fn ciphertext_hides_plaintext() {
    let (client, _) = peers();
    let plaintext = b"confidential payload bytes".to_vec();
    let sealed = client.seal(&plaintext).unwrap();

    let haystack = &sealed.payload;
    let found = haystack.windows(plaintext.len()).any(|w| w == plaintext.as_slice());
    assert!(!found, "plaintext must not appear in the sealed payload");
}

#[test]
fn fresh_iv_per_envelope() {
    let (client, _) = peers();
    let a = client.seal(b"same input").unwrap();
    let b = client.seal(b"same input").unwrap();
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.payload, b.payload);
}

#[test]
fn payload_bit_flip_is_rejected() {
    let (client, server) = peers();
    let sealed = client.seal(b"sign me").unwrap();

    // Flip one bit inside the ciphertext area (after the 4-byte length).
    let mut tampered = sealed.payload.clone();
    tampered[4] ^= 0x01;

    match server.open(&tampered, &sealed.iv) {
        Err(CryptoError::SignatureMismatch) => {}
        other => panic!("expected SignatureMismatch, got {other:?}"),
    }
}

#[test]
fn iv_bit_flip_is_rejected() {
    let (client, server) = peers();
    let sealed = client.seal(b"sign me too").unwrap();

    let mut iv = sealed.iv.to_vec();
    iv[0] ^= 0x80;

    match server.open(&sealed.payload, &iv) {
        Err(CryptoError::SignatureMismatch) => {}
        other => panic!("expected SignatureMismatch, got {other:?}"),
    }
}

#[test]
fn wrong_sender_key_is_rejected() {
    let (client, _) = peers();
    let (_, other_server) = peers();
    let sealed = client.seal(b"who signed this").unwrap();

    // other_server verifies against an unrelated client key.
    assert!(matches!(
        other_server.open(&sealed.payload, &sealed.iv),
        Err(CryptoError::SignatureMismatch)
    ));
}

#[test]
fn malformed_trailer_is_rejected() {
    let (_, server) = peers();
    assert!(matches!(
        server.open(&[1, 2, 3], &[0u8; 16]),
        Err(CryptoError::TrailerFormat)
    ));
}

#[test]
fn bad_iv_length_is_rejected() {
    let (client, server) = peers();
    let sealed = client.seal(b"x").unwrap();
    assert!(matches!(
        server.open(&sealed.payload, &sealed.iv[..8]),
        Err(CryptoError::InvalidIv { len: 8 })
    ));
}

#[test]
fn session_key_wrap_round_trip() {
    let client = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let key = generate_session_key();

    let wrapped = wrap_session_key(client.public(), &key).unwrap();
    assert_ne!(wrapped.as_slice(), key.as_slice());

    let unwrapped = unwrap_session_key(client.private(), &wrapped).unwrap();
    assert_eq!(unwrapped, key);
}

#[test]
fn public_key_der_round_trip() {
    let pair = RsaKeyPair::generate(TEST_KEY_BITS).unwrap();
    let der = pair.public_key_der().unwrap();
    let decoded = public_key_from_der(&der).unwrap();
    assert_eq!(&decoded, pair.public());
}
