//! SHA-256 hashing and message identifiers.
//!
//! Packet identifiers are the first 16 bytes of
//! `SHA-256(sender ‖ timestamp_be ‖ payload)`, which makes the ID a
//! commitment to the packet's origin and content: a replayed packet keeps
//! its ID (and is deduplicated), a mutated one changes it.

use sha2::{Digest, Sha256};

/// Length of a truncated message identifier.
pub const MESSAGE_ID_LEN: usize = 16;

/// A 128-bit packet identifier.
pub type MessageId = [u8; MESSAGE_ID_LEN];

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    digest.into()
}

/// Compute a packet's message ID from its identifying fields.
pub fn message_id(sender: &[u8; 32], timestamp_ms: u64, payload: &[u8]) -> MessageId {
    let mut hasher = Sha256::new();
    hasher.update(sender);
    hasher.update(timestamp_ms.to_be_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();
    let mut id = [0u8; MESSAGE_ID_LEN];
    id.copy_from_slice(&digest[..MESSAGE_ID_LEN]);
    id
}
