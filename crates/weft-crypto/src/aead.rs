//! XChaCha20-Poly1305 AEAD (draft-irtf-cfrg-xchacha).
//!
//! The extended 24-byte nonce is wide enough to draw from the CSPRNG per
//! operation; session keys rotate long before the random-nonce birthday
//! bound matters.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};

use crate::kdf::SessionKey;
use crate::{CryptoError, Result};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Generate a random 24-byte nonce from the OS CSPRNG.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    crate::random_fill(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key` and `nonce`, authenticating `aad`.
///
/// Returns ciphertext with the 16-byte tag appended. The nonce must never
/// be reused with the same key.
pub fn encrypt(
    key: &SessionKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthFail)
}

/// Decrypt `ciphertext` (with appended tag) under `key` and `nonce`.
///
/// Fails with [`CryptoError::AuthFail`] on tag mismatch, wrong key, wrong
/// nonce, or mismatched `aad`.
pub fn decrypt(
    key: &SessionKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::ShortBuffer {
            need: TAG_SIZE,
            got: ciphertext.len(),
        });
    }
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthFail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_roundtrip() {
        let k = key(0x42);
        let nonce = random_nonce();
        let ct = encrypt(&k, &nonce, b"hello mesh", b"ad").expect("encrypt");
        let pt = decrypt(&k, &nonce, &ct, b"ad").expect("decrypt");
        assert_eq!(pt, b"hello mesh");
    }

    #[test]
    fn test_ciphertext_length() {
        let k = key(0x42);
        let nonce = [1u8; NONCE_SIZE];
        let ct = encrypt(&k, &nonce, b"abc", &[]).expect("encrypt");
        assert_eq!(ct.len(), 3 + TAG_SIZE);
    }

    #[test]
    fn test_empty_plaintext_is_valid() {
        let k = key(0x42);
        let nonce = [1u8; NONCE_SIZE];
        let ct = encrypt(&k, &nonce, b"", &[]).expect("encrypt");
        assert_eq!(ct.len(), TAG_SIZE);
        assert!(decrypt(&k, &nonce, &ct, &[]).expect("decrypt").is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let nonce = [1u8; NONCE_SIZE];
        let ct = encrypt(&key(1), &nonce, b"secret", &[]).expect("encrypt");
        assert!(matches!(
            decrypt(&key(2), &nonce, &ct, &[]),
            Err(CryptoError::AuthFail)
        ));
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let k = key(1);
        let ct = encrypt(&k, &[1u8; NONCE_SIZE], b"secret", &[]).expect("encrypt");
        assert!(decrypt(&k, &[2u8; NONCE_SIZE], &ct, &[]).is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let k = key(1);
        let nonce = [1u8; NONCE_SIZE];
        let ct = encrypt(&k, &nonce, b"secret", b"route-a").expect("encrypt");
        assert!(decrypt(&k, &nonce, &ct, b"route-b").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let k = key(1);
        let nonce = [1u8; NONCE_SIZE];
        let mut ct = encrypt(&k, &nonce, b"secret", &[]).expect("encrypt");
        ct[0] ^= 0x80;
        assert!(decrypt(&k, &nonce, &ct, &[]).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_is_short_buffer() {
        let k = key(1);
        let nonce = [1u8; NONCE_SIZE];
        assert!(matches!(
            decrypt(&k, &nonce, &[0u8; 4], &[]),
            Err(CryptoError::ShortBuffer { .. })
        ));
    }

    #[test]
    fn test_random_nonces_differ() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
