//! Persisted session-key records.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::PeerId;

/// Which direction a session key protects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDirection {
    /// Encrypts our outbound traffic to the peer.
    Tx,
    /// Decrypts the peer's inbound traffic.
    Rx,
}

impl KeyDirection {
    /// Stable single-character form for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyDirection::Tx => "tx",
            KeyDirection::Rx => "rx",
        }
    }

    /// Parse the persisted form.
    pub fn from_str_persisted(s: &str) -> Option<Self> {
        match s {
            "tx" => Some(KeyDirection::Tx),
            "rx" => Some(KeyDirection::Rx),
            _ => None,
        }
    }
}

/// One direction of a derived session key, as persisted.
///
/// A key is valid until its expiry or until the rotation counter moves on;
/// the previous counter stays decryptable for a grace window.
#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionKeyRecord {
    /// The peer this key is shared with.
    pub peer_id: PeerId,
    /// Raw 32-byte key material.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub key: [u8; 32],
    /// Direction this key protects.
    pub direction: KeyDirection,
    /// Derivation time, unix millis.
    pub created_at_ms: u64,
    /// Expiry time, unix millis.
    pub expires_at_ms: u64,
    /// Rotation counter; increments on each rekey.
    pub rotation: u32,
}

impl std::fmt::Debug for SessionKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyRecord")
            .field("peer_id", &self.peer_id)
            .field("direction", &self.direction)
            .field("rotation", &self.rotation)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        for d in [KeyDirection::Tx, KeyDirection::Rx] {
            assert_eq!(
                KeyDirection::from_str_persisted(d.as_str()),
                Some(d)
            );
        }
        assert_eq!(KeyDirection::from_str_persisted("zz"), None);
    }

    #[test]
    fn test_debug_omits_key_material() {
        let record = SessionKeyRecord {
            peer_id: PeerId::from_bytes([1; 32]),
            key: [0xAA; 32],
            direction: KeyDirection::Tx,
            created_at_ms: 0,
            expires_at_ms: 1,
            rotation: 0,
        };
        let rendered = format!("{record:?}");
        assert!(!rendered.contains("aaaa"));
    }
}
