//! # weft-crypto
//!
//! Cryptographic primitives for the Weft mesh protocol.
//!
//! The suite is fixed; no algorithm negotiation happens on the wire:
//!
//! - [`ed25519`] — Ed25519 signing and verification (RFC 8032)
//! - [`x25519`] — X25519 key agreement (RFC 7748), contributory-only
//! - [`kdf`] — HKDF-SHA-256 session-key derivation
//! - [`aead`] — XChaCha20-Poly1305 AEAD with 24-byte nonces
//! - [`hash`] — SHA-256 and truncated message identifiers
//! - [`ecies`] — sealed boxes for signaling blobs
//!
//! All randomness comes from the operating system CSPRNG. Malformed input
//! is reported through [`CryptoError`]; nothing in this crate panics on
//! attacker-controlled bytes.

pub mod aead;
pub mod ecies;
pub mod ed25519;
pub mod hash;
pub mod kdf;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A key was malformed, non-contributory, or otherwise unusable.
    #[error("bad key: {0}")]
    BadKey(String),

    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    BadSignature,

    /// AEAD authentication failed (tag mismatch).
    #[error("AEAD authentication failed")]
    AuthFail,

    /// Input buffer too short for the expected layout.
    #[error("short buffer: need {need} bytes, got {got}")]
    ShortBuffer { need: usize, got: usize },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Fill a buffer with bytes from the operating system CSPRNG.
pub fn random_fill(buf: &mut [u8]) {
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, buf);
}

/// Return `n` bytes from the operating system CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    random_fill(&mut buf);
    buf
}
