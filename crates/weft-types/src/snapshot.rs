//! The versioned export snapshot document.
//!
//! The snapshot is the authoritative persisted-state shape across backends:
//! whatever a storage backend does internally, `export` produces this
//! document and `import` consumes it.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::message::{Conversation, StoredMessage};
use crate::peer::PeerRecord;
use crate::queue::QueuedMessage;
use crate::route::RouteEntry;
use crate::session::SessionKeyRecord;

/// Current snapshot document version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// How an import reconciles the snapshot with existing rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Drop all existing rows, then load the snapshot.
    Replace,
    /// Keep whichever of (existing, snapshot) is newer per key.
    /// Importing the same snapshot twice is a no-op.
    MergeNewer,
}

/// A complete, self-contained export of local mesh state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Document version; readers reject versions they do not know.
    pub version: u32,
    pub identities: Vec<Identity>,
    pub peers: Vec<PeerRecord>,
    pub routes: Vec<RouteEntry>,
    pub session_keys: Vec<SessionKeyRecord>,
    pub queued_messages: Vec<QueuedMessage>,
    pub conversations: Vec<Conversation>,
    pub messages: Vec<StoredMessage>,
    /// Export time, unix millis.
    pub exported_at_ms: u64,
}

impl Snapshot {
    /// An empty snapshot at the current version.
    pub fn empty(exported_at_ms: u64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            exported_at_ms,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerId;

    #[test]
    fn test_empty_snapshot_shape() {
        let snap = Snapshot::empty(42);
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.exported_at_ms, 42);
        assert!(snap.peers.is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let mut snap = Snapshot::empty(1_700_000_000_000);
        snap.peers.push(PeerRecord::sighted(
            PeerId::from_bytes([7; 32]),
            1_700_000_000_000,
        ));
        let json = serde_json::to_string(&snap).expect("serialize");
        let back: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.peers.len(), 1);
        assert_eq!(back.peers[0].peer_id, snap.peers[0].peer_id);
    }
}
