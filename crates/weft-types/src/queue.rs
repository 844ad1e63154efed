//! Store-and-forward queue entries.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{MessageId, PeerId};

/// Delivery priority for queued messages.
///
/// Ordering is derived from the declaration order, so
/// `Critical > High > Normal > Low` holds under `Ord`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Stable integer form for persistence.
    pub fn as_u8(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    /// Parse the persisted integer form, defaulting unknown values to
    /// `Normal`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Critical,
            _ => Priority::Normal,
        }
    }
}

/// A message waiting for its destination to become reachable.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Identifier of the underlying packet.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub id: MessageId,
    /// Destination peer.
    pub destination: PeerId,
    /// The sealed packet bytes, ready to transmit.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub payload: Vec<u8>,
    /// Delivery priority.
    pub priority: Priority,
    /// Delivery attempts so far; monotonically non-decreasing.
    pub attempts: u32,
    /// Time of the most recent attempt, unix millis.
    pub last_attempt_at_ms: Option<u64>,
    /// Enqueue time, unix millis.
    pub created_at_ms: u64,
    /// Expiry time, unix millis. Always after `created_at_ms`.
    pub expires_at_ms: u64,
}

impl QueuedMessage {
    /// Whether this entry is past its expiry at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}
