//! Export/import of the full persisted state.
//!
//! The snapshot document (defined in `weft-types`) is the authoritative
//! shape of persisted state. Export produces it; import consumes it inside
//! a single transaction, so a corrupt snapshot aborts with no partial
//! mutation.

use rusqlite::Connection;

use weft_types::snapshot::{MergeStrategy, Snapshot, SNAPSHOT_VERSION};

use crate::{queries, DbError, Result};

/// Export the entire store as a snapshot document.
///
/// The primary identity, when present, is first in `identities`; import
/// restores primacy from that position.
pub fn export_all(conn: &Connection, now_ms: u64) -> Result<Snapshot> {
    let mut identities = queries::identities::list(conn)?;
    if let Some(primary) = queries::identities::get_primary(conn)? {
        identities.sort_by_key(|i| i.peer_id != primary.peer_id);
    }

    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        identities,
        peers: queries::peers::list(conn)?,
        routes: queries::routes::list(conn)?,
        session_keys: queries::session_keys::list(conn)?,
        queued_messages: queries::queue::list(conn)?,
        conversations: queries::conversations::list(conn)?,
        messages: queries::messages::list(conn)?,
        exported_at_ms: now_ms,
    })
}

/// Parse a snapshot from its serialized JSON form.
pub fn parse(bytes: &[u8]) -> Result<Snapshot> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)
        .map_err(|e| DbError::CorruptSnapshot(e.to_string()))?;
    validate(&snapshot)?;
    Ok(snapshot)
}

/// Serialize a snapshot to JSON bytes.
pub fn serialize(snapshot: &Snapshot) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(snapshot).map_err(|e| DbError::Serialization(e.to_string()))
}

fn validate(snapshot: &Snapshot) -> Result<()> {
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(DbError::CorruptSnapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }
    for q in &snapshot.queued_messages {
        if q.expires_at_ms <= q.created_at_ms {
            return Err(DbError::CorruptSnapshot(
                "queued message expires before creation".into(),
            ));
        }
    }
    for r in &snapshot.routes {
        if r.hop_count == 0 {
            return Err(DbError::CorruptSnapshot("route with zero hop count".into()));
        }
    }
    Ok(())
}

/// Import a snapshot with the given merge strategy.
///
/// Runs in one transaction: either every row lands or none do.
pub fn import(
    conn: &mut Connection,
    snapshot: &Snapshot,
    strategy: MergeStrategy,
) -> Result<()> {
    validate(snapshot)?;

    let tx = conn.transaction()?;

    if strategy == MergeStrategy::Replace {
        tx.execute_batch(
            "DELETE FROM messages;
             DELETE FROM conversations;
             DELETE FROM queued_messages;
             DELETE FROM session_keys;
             DELETE FROM routes;
             DELETE FROM peers;
             DELETE FROM identities;",
        )?;
    }

    for (index, identity) in snapshot.identities.iter().enumerate() {
        let keep_existing = strategy == MergeStrategy::MergeNewer
            && match queries::identities::get(&tx, &identity.peer_id) {
                Ok(existing) => existing.created_at_ms >= identity.created_at_ms,
                Err(DbError::NotFound(_)) => false,
                Err(other) => return Err(other),
            };
        if !keep_existing {
            // The first exported identity is the primary.
            let primary = strategy == MergeStrategy::Replace && index == 0;
            queries::identities::upsert(&tx, identity, primary)?;
        }
    }

    for peer in &snapshot.peers {
        let keep_existing = strategy == MergeStrategy::MergeNewer
            && match queries::peers::get(&tx, &peer.peer_id) {
                Ok(existing) => existing.last_seen_ms >= peer.last_seen_ms,
                Err(DbError::NotFound(_)) => false,
                Err(other) => return Err(other),
            };
        if !keep_existing {
            queries::peers::upsert(&tx, peer)?;
        }
    }

    for route in &snapshot.routes {
        let keep_existing = strategy == MergeStrategy::MergeNewer
            && match queries::routes::get(&tx, &route.destination) {
                Ok(existing) => existing.expires_at_ms >= route.expires_at_ms,
                Err(DbError::NotFound(_)) => false,
                Err(other) => return Err(other),
            };
        if !keep_existing {
            queries::routes::upsert(&tx, route)?;
        }
    }

    for key in &snapshot.session_keys {
        // Rotation is part of the primary key, so merge simply fills gaps.
        queries::session_keys::upsert(&tx, key)?;
    }

    for queued in &snapshot.queued_messages {
        let exists = matches!(queries::queue::get(&tx, &queued.id), Ok(_));
        if strategy == MergeStrategy::Replace || !exists {
            queries::queue::upsert(&tx, queued)?;
        }
    }

    for conversation in &snapshot.conversations {
        let keep_existing = strategy == MergeStrategy::MergeNewer
            && match queries::conversations::get(&tx, &conversation.id) {
                Ok(existing) => existing.last_activity_ms >= conversation.last_activity_ms,
                Err(DbError::NotFound(_)) => false,
                Err(other) => return Err(other),
            };
        if !keep_existing {
            queries::conversations::upsert(&tx, conversation)?;
        }
    }

    for message in &snapshot.messages {
        // Messages are immutable once stored; merge fills gaps only.
        let exists = matches!(queries::messages::get(&tx, &message.id), Ok(_));
        if strategy == MergeStrategy::Replace || !exists {
            queries::messages::upsert(&tx, message)?;
        }
    }

    tx.commit()?;
    tracing::info!(
        peers = snapshot.peers.len(),
        routes = snapshot.routes.len(),
        queued = snapshot.queued_messages.len(),
        ?strategy,
        "snapshot imported"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::identity::Identity;
    use weft_types::peer::PeerRecord;
    use weft_types::PeerId;

    fn seeded() -> Connection {
        let conn = crate::open_memory().expect("open");
        let identity = Identity {
            peer_id: PeerId::from_bytes([1; 32]),
            signing_seed: [1; 32],
            agreement_secret: [2; 32],
            display_name: "x".into(),
            created_at_ms: 1000,
        };
        queries::identities::upsert(&conn, &identity, true).expect("identity");
        queries::peers::upsert(&conn, &PeerRecord::sighted(PeerId::from_bytes([2; 32]), 500))
            .expect("peer");
        conn
    }

    #[test]
    fn test_export_import_replace_roundtrip() {
        let source = seeded();
        let snapshot = export_all(&source, 9000).expect("export");

        let mut target = crate::open_memory().expect("open");
        import(&mut target, &snapshot, MergeStrategy::Replace).expect("import");

        let re_exported = export_all(&target, 9000).expect("re-export");
        let a = serialize(&snapshot).expect("serialize");
        let b = serialize(&re_exported).expect("serialize");
        assert_eq!(a, b);
    }

    #[test]
    fn test_replace_restores_primary() {
        let source = seeded();
        let snapshot = export_all(&source, 0).expect("export");

        let mut target = crate::open_memory().expect("open");
        import(&mut target, &snapshot, MergeStrategy::Replace).expect("import");

        let primary = queries::identities::get_primary(&target)
            .expect("query")
            .expect("present");
        assert_eq!(primary.peer_id, PeerId::from_bytes([1; 32]));
    }

    #[test]
    fn test_merge_newer_is_idempotent() {
        let source = seeded();
        let snapshot = export_all(&source, 0).expect("export");

        let mut target = crate::open_memory().expect("open");
        import(&mut target, &snapshot, MergeStrategy::Replace).expect("seed");
        let before = serialize(&export_all(&target, 0).expect("export")).expect("bytes");

        import(&mut target, &snapshot, MergeStrategy::MergeNewer).expect("merge 1");
        import(&mut target, &snapshot, MergeStrategy::MergeNewer).expect("merge 2");
        let after = serialize(&export_all(&target, 0).expect("export")).expect("bytes");
        assert_eq!(before, after);
    }

    #[test]
    fn test_merge_newer_keeps_fresher_local_peer() {
        let source = seeded();
        let snapshot = export_all(&source, 0).expect("export");

        let mut target = crate::open_memory().expect("open");
        let mut fresher = PeerRecord::sighted(PeerId::from_bytes([2; 32]), 99_999);
        fresher.reputation = 90;
        queries::peers::upsert(&target, &fresher).expect("peer");

        import(&mut target, &snapshot, MergeStrategy::MergeNewer).expect("merge");
        let peer = queries::peers::get(&target, &fresher.peer_id).expect("get");
        assert_eq!(peer.last_seen_ms, 99_999);
        assert_eq!(peer.reputation, 90);
    }

    #[test]
    fn test_bad_version_rejected_without_mutation() {
        let source = seeded();
        let mut snapshot = export_all(&source, 0).expect("export");
        snapshot.version = 99;

        let mut target = crate::open_memory().expect("open");
        assert!(matches!(
            import(&mut target, &snapshot, MergeStrategy::Replace),
            Err(DbError::CorruptSnapshot(_))
        ));
        assert!(queries::peers::list(&target).expect("list").is_empty());
    }

    #[test]
    fn test_corrupt_json_rejected() {
        assert!(matches!(
            parse(b"{\"version\": \"not a number\"}"),
            Err(DbError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_parse_serialize_roundtrip() {
        let source = seeded();
        let snapshot = export_all(&source, 777).expect("export");
        let bytes = serialize(&snapshot).expect("serialize");
        let parsed = parse(&bytes).expect("parse");
        assert_eq!(parsed.exported_at_ms, 777);
        assert_eq!(parsed.peers.len(), 1);
    }
}
