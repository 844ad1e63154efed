//! Typed payload bodies carried inside the outer packet.
//!
//! The outer packet authenticates and routes; these bodies carry the
//! actual content. Unicast application traffic travels as a
//! [`SecureEnvelope`] whose `content` field is AEAD-encrypted under the
//! per-peer session key; gossip announcements are plaintext (they are
//! broadcast) and rely on the outer signature alone.

use serde::{Deserialize, Serialize};

use weft_types::{MessageId, PeerId};

use crate::{cbor, Result};

/// The session-encrypted envelope for unicast traffic.
///
/// `to` is deliberately plaintext: relays route on it without being able
/// to read `ciphertext`. The handshake fields ride inline on the first
/// packet of a session (and on rekeys); steady-state envelopes omit them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// Logical recipient; the routing destination.
    pub to: PeerId,
    /// Session rotation counter the ciphertext was encrypted under.
    pub rotation: u32,
    /// Ephemeral X25519 public key, present on handshake and rekey.
    pub eph_pk: Option<[u8; 32]>,
    /// Sender's static X25519 key, present on handshake so the responder
    /// can address replies before gossip catches up.
    pub sender_agreement_pk: Option<[u8; 32]>,
    /// XChaCha20-Poly1305 nonce.
    pub nonce: [u8; 24],
    /// Encrypted inner content with appended tag.
    pub ciphertext: Vec<u8>,
}

impl SecureEnvelope {
    /// Serialize to CBOR for the outer packet payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    /// Parse from an outer packet payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        cbor::from_slice(data)
    }

    /// Whether this envelope opens a session or rotates its keys.
    pub fn carries_handshake(&self) -> bool {
        self.eph_pk.is_some()
    }
}

/// One reachability hint inside a gossip announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEntry {
    /// The peer being advertised.
    pub peer_id: PeerId,
    /// Hops from the announcer to that peer (0 = the announcer itself
    /// before the receiver adds its own hop).
    pub hop_count: u8,
    /// When the announcer last saw that peer, by the announcer's clock.
    pub last_seen_ms: u64,
}

/// Periodic peer-presence and reachability announcement.
///
/// Plaintext by design: it is broadcast-relayed and its authenticity comes
/// from the outer packet signature. Doubles as the liveness heartbeat.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipAnnouncement {
    /// Announcer's static X25519 key, so receivers can open sessions.
    pub agreement_pk: [u8; 32],
    /// Announcer's own clock at send time, unix millis.
    pub self_clock_ms: u64,
    /// Bounded set of peers the announcer can reach.
    pub entries: Vec<GossipEntry>,
}

impl GossipAnnouncement {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        cbor::from_slice(data)
    }
}

/// Delivery acknowledgement; travels encrypted like any application body.
///
/// With `read = false` this confirms delivery; with `read = true` it is an
/// application-level read receipt for an already delivered message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckBody {
    /// The message ID being acknowledged.
    pub acked: MessageId,
    /// Whether this is a read receipt rather than a delivery confirmation.
    #[serde(default)]
    pub read: bool,
}

impl AckBody {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        cbor::from_slice(data)
    }
}

/// Metadata announcing an upcoming file transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOffer {
    /// Transfer identifier shared by all chunks.
    pub transfer_id: [u8; 16],
    /// Suggested file name.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Number of chunks that will follow.
    pub chunk_count: u32,
}

impl FileOffer {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        cbor::from_slice(data)
    }
}

/// One chunk of a file transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Transfer this chunk belongs to.
    pub transfer_id: [u8; 16],
    /// Zero-based chunk index.
    pub index: u32,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

impl FileChunk {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        cbor::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        cbor::from_slice(data)
    }
}
