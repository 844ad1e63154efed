//! Application-surface conversations, stored messages, and the delivery
//! status state machine.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{ConversationId, MessageId, MessageKind, PeerId};

/// Delivery status of a locally originated message.
///
/// Transitions are monotone:
///
/// ```text
/// Pending -> (Sent | Queued) -> Delivered -> Read
///    \___________/
///         v
///       Failed   (terminal; only from Pending or Queued)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Accepted by the facade, not yet handed anywhere.
    Pending,
    /// Handed to a transport buffer.
    Sent,
    /// Parked in the store-and-forward queue.
    Queued,
    /// The recipient's signed ACK arrived.
    Delivered,
    /// The recipient's application reported a read receipt.
    Read,
    /// Expired before delivery. Terminal.
    Failed,
}

impl DeliveryStatus {
    /// Whether moving from `self` to `next` is a legal (forward) transition.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match (self, next) {
            (Pending, Sent) | (Pending, Queued) | (Pending, Failed) => true,
            // A queued message can reach a transport on flush, or expire.
            (Queued, Sent) | (Queued, Failed) => true,
            (Sent, Delivered) => true,
            // The ACK can outrun the flush bookkeeping.
            (Queued, Delivered) => true,
            (Delivered, Read) => true,
            _ => false,
        }
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Read | DeliveryStatus::Failed)
    }

    /// Stable string form for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// Parse the persisted form.
    pub fn from_str_persisted(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "queued" => Some(DeliveryStatus::Queued),
            "delivered" => Some(DeliveryStatus::Delivered),
            "read" => Some(DeliveryStatus::Read),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// A 1:1 conversation with a remote peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    /// Deterministic identifier derived from the sorted peer-id pair.
    #[serde(with = "conversation_id_hex")]
    pub id: ConversationId,
    /// The remote peer.
    pub peer_id: PeerId,
    /// Creation time, unix millis.
    pub created_at_ms: u64,
    /// Time of the newest message, unix millis.
    pub last_activity_ms: u64,
}

/// One message persisted in a conversation.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Packet-level identifier.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub id: MessageId,
    /// Owning conversation.
    #[serde(with = "conversation_id_hex")]
    pub conversation_id: ConversationId,
    /// Originating peer.
    pub sender: PeerId,
    /// Destination peer.
    pub recipient: PeerId,
    /// Application kind.
    pub kind: MessageKind,
    /// Decrypted content bytes.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub content: Vec<u8>,
    /// Origination time, unix millis.
    pub timestamp_ms: u64,
    /// Delivery status (meaningful for locally originated messages).
    pub status: DeliveryStatus,
}

mod conversation_id_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        id: &[u8; 32],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("conversation id must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryStatus::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Pending.can_transition_to(Sent));
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));
    }

    #[test]
    fn test_no_backwards_transitions() {
        assert!(!Sent.can_transition_to(Pending));
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Queued.can_transition_to(Pending));
    }

    #[test]
    fn test_failed_only_from_pending_or_queued() {
        assert!(Pending.can_transition_to(Failed));
        assert!(Queued.can_transition_to(Failed));
        assert!(!Sent.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Read.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Delivered.is_terminal());
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Sent));
    }

    #[test]
    fn test_status_persisted_roundtrip() {
        for s in [Pending, Sent, Queued, Delivered, Read, Failed] {
            assert_eq!(DeliveryStatus::from_str_persisted(s.as_str()), Some(s));
        }
    }
}
