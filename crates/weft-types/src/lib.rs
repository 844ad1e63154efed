//! # weft-types
//!
//! Shared domain types for the Weft mesh workspace: peer addressing, the
//! persisted entities (identities, peers, routes, session keys, queued
//! messages, conversations), the message-kind registry, and the export
//! snapshot document.

pub mod identity;
pub mod message;
pub mod peer;
pub mod queue;
pub mod route;
pub mod session;
pub mod snapshot;

use serde::{Deserialize, Serialize};

/// A 128-bit packet/message identifier (truncated SHA-256).
pub type MessageId = [u8; 16];

/// A conversation identifier.
pub type ConversationId = [u8; 32];

/// Current wire-protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error types for domain-type parsing.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// A peer ID string was not 64 lowercase hex characters.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// An unknown message kind byte.
    #[error("unknown message kind: {0:#04x}")]
    UnknownKind(u8),
}

pub type Result<T> = std::result::Result<T, TypeError>;

/// A mesh-level peer address: the peer's long-term Ed25519 public key.
///
/// Rendered everywhere (logs, storage, APIs) as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Wrap a raw Ed25519 public key.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw public-key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copy out the raw public-key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Parse from a 64-character lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 64 || s.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(TypeError::InvalidPeerId(s.to_string()));
        }
        let raw = hex::decode(s).map_err(|_| TypeError::InvalidPeerId(s.to_string()))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw);
        Ok(Self(bytes))
    }

    /// Render as 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// A shortened form for log lines: first 8 hex characters.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl std::str::FromStr for PeerId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Application message kinds carried in the packet `kind` byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A text message.
    Text,
    /// Metadata announcing an upcoming file transfer.
    FileOffer,
    /// One chunk of a file transfer.
    FileChunk,
    /// Delivery acknowledgement for a previously received message.
    Ack,
    /// Peer-presence and reachability announcement.
    Gossip,
    /// Session handshake carrying an ephemeral key.
    Handshake,
    /// Session rekey carrying a fresh ephemeral key.
    Rekey,
}

impl MessageKind {
    /// The wire byte for this kind.
    pub fn as_u8(self) -> u8 {
        match self {
            MessageKind::Text => 0x01,
            MessageKind::FileOffer => 0x02,
            MessageKind::FileChunk => 0x03,
            MessageKind::Ack => 0x04,
            MessageKind::Gossip => 0x05,
            MessageKind::Handshake => 0x06,
            MessageKind::Rekey => 0x07,
        }
    }

    /// Parse a wire byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MessageKind::Text),
            0x02 => Ok(MessageKind::FileOffer),
            0x03 => Ok(MessageKind::FileChunk),
            0x04 => Ok(MessageKind::Ack),
            0x05 => Ok(MessageKind::Gossip),
            0x06 => Ok(MessageKind::Handshake),
            0x07 => Ok(MessageKind::Rekey),
            other => Err(TypeError::UnknownKind(other)),
        }
    }

    /// Whether a routeless packet of this kind may be relayed to all
    /// connected peers instead of being queued.
    pub fn permits_broadcast_relay(self) -> bool {
        matches!(self, MessageKind::Gossip)
    }

    /// Whether local delivery of this kind triggers a signed ACK back to
    /// the sender.
    pub fn expects_ack(self) -> bool {
        matches!(
            self,
            MessageKind::Text | MessageKind::FileOffer | MessageKind::FileChunk
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_hex_roundtrip() {
        let id = PeerId::from_bytes([0xAB; 32]);
        let parsed = PeerId::from_hex(&id.to_hex()).expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_peer_id_rejects_uppercase() {
        let upper = "AB".repeat(32);
        assert!(PeerId::from_hex(&upper).is_err());
    }

    #[test]
    fn test_peer_id_rejects_wrong_length() {
        assert!(PeerId::from_hex("abcd").is_err());
    }

    #[test]
    fn test_peer_id_serde_as_hex_string() {
        let id = PeerId::from_bytes([1; 32]);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: PeerId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_kind_byte_roundtrip() {
        for kind in [
            MessageKind::Text,
            MessageKind::FileOffer,
            MessageKind::FileChunk,
            MessageKind::Ack,
            MessageKind::Gossip,
            MessageKind::Handshake,
            MessageKind::Rekey,
        ] {
            assert_eq!(MessageKind::from_u8(kind.as_u8()).expect("known"), kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(MessageKind::from_u8(0x00).is_err());
        assert!(MessageKind::from_u8(0x08).is_err());
        assert!(MessageKind::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_only_gossip_broadcast_relays() {
        assert!(MessageKind::Gossip.permits_broadcast_relay());
        assert!(!MessageKind::Text.permits_broadcast_relay());
        assert!(!MessageKind::Ack.permits_broadcast_relay());
    }
}
