//! Known-peer records and reputation bounds.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::PeerId;

/// Lowest possible reputation score.
pub const REPUTATION_MIN: u8 = 0;

/// Highest possible reputation score.
pub const REPUTATION_MAX: u8 = 100;

/// Starting reputation for a newly sighted peer.
pub const REPUTATION_INITIAL: u8 = 50;

/// A peer known to this device, created on first sighting.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Mesh address (hex of `signing_key`).
    pub peer_id: PeerId,
    /// The peer's Ed25519 public key. Always equal to `peer_id`'s bytes.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signing_key: [u8; 32],
    /// The peer's advertised X25519 agreement key, once learned.
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub agreement_key: Option<[u8; 32]>,
    /// Last time we saw traffic from this peer, unix millis.
    pub last_seen_ms: u64,
    /// Reputation score in `[0, 100]`.
    pub reputation: u8,
    /// Blacklisted peers are ignored by the router and gossip.
    pub blacklisted: bool,
    /// Opaque transport bootstrap hints (addresses, service identifiers).
    pub bootstrap_hints: Vec<String>,
}

impl PeerRecord {
    /// Create a record for a peer sighted for the first time.
    pub fn sighted(peer_id: PeerId, now_ms: u64) -> Self {
        Self {
            peer_id,
            signing_key: peer_id.to_bytes(),
            agreement_key: None,
            last_seen_ms: now_ms,
            reputation: REPUTATION_INITIAL,
            blacklisted: false,
            bootstrap_hints: Vec::new(),
        }
    }

    /// Apply a reputation delta, clamped to `[0, 100]`.
    pub fn adjust_reputation(&mut self, delta: i8) {
        let adjusted = i16::from(self.reputation) + i16::from(delta);
        self.reputation = adjusted.clamp(
            i16::from(REPUTATION_MIN),
            i16::from(REPUTATION_MAX),
        ) as u8;
    }
}
