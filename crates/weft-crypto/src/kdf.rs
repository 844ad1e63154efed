//! HKDF-SHA-256 session-key derivation (RFC 5869).
//!
//! A shared X25519 secret is never used directly as an AEAD key. Both sides
//! expand it into one key per direction; the `info` string binds the role so
//! the initiator's transmit key is the responder's receive key and vice
//! versa.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Derived key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// Info string for the handshake initiator's transmit direction.
pub const INFO_TX: &[u8] = b"weft v1 tx";

/// Info string for the handshake initiator's receive direction.
pub const INFO_RX: &[u8] = b"weft v1 rx";

/// A 32-byte symmetric session key, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_LEN],
}

impl SessionKey {
    /// Wrap raw key material.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.bytes
    }

    /// Copy out the raw key bytes (for persistence).
    pub fn to_bytes(&self) -> [u8; SESSION_KEY_LEN] {
        self.bytes
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never appears in logs.
        f.write_str("SessionKey(..)")
    }
}

/// Derive a session key from a shared secret.
///
/// `salt` may be empty (the handshake uses an all-zero salt); `info` binds
/// the role and direction ([`INFO_TX`] / [`INFO_RX`]).
pub fn derive_session_key(shared: &[u8; 32], salt: &[u8], info: &[u8]) -> Result<SessionKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut okm = [0u8; SESSION_KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SessionKey::from_bytes(okm))
}

/// Derive the (tx, rx) key pair for one side of a handshake.
///
/// The initiator passes `initiator = true`; the responder mirrors the
/// directions so that each side's tx key is the other's rx key.
pub fn derive_direction_keys(
    shared: &[u8; 32],
    initiator: bool,
) -> Result<(SessionKey, SessionKey)> {
    let salt = [0u8; 32];
    let (tx_info, rx_info) = if initiator {
        (INFO_TX, INFO_RX)
    } else {
        (INFO_RX, INFO_TX)
    };
    let tx = derive_session_key(shared, &salt, tx_info)?;
    let rx = derive_session_key(shared, &salt, rx_info)?;
    Ok((tx, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let shared = [3u8; 32];
        let a = derive_session_key(&shared, b"salt", INFO_TX).expect("derive");
        let b = derive_session_key(&shared, b"salt", INFO_TX).expect("derive");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_info_separates_directions() {
        let shared = [3u8; 32];
        let tx = derive_session_key(&shared, &[], INFO_TX).expect("derive");
        let rx = derive_session_key(&shared, &[], INFO_RX).expect("derive");
        assert_ne!(tx.as_bytes(), rx.as_bytes());
    }

    #[test]
    fn test_salt_separates_keys() {
        let shared = [3u8; 32];
        let a = derive_session_key(&shared, b"a", INFO_TX).expect("derive");
        let b = derive_session_key(&shared, b"b", INFO_TX).expect("derive");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_direction_keys_mirror() {
        let shared = [9u8; 32];
        let (i_tx, i_rx) = derive_direction_keys(&shared, true).expect("derive");
        let (r_tx, r_rx) = derive_direction_keys(&shared, false).expect("derive");
        assert_eq!(i_tx.as_bytes(), r_rx.as_bytes());
        assert_eq!(i_rx.as_bytes(), r_tx.as_bytes());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SessionKey::from_bytes([0xAB; 32]);
        assert_eq!(format!("{key:?}"), "SessionKey(..)");
    }
}
