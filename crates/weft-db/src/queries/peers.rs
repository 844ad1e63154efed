//! Peer query functions.

use rusqlite::Connection;

use weft_types::peer::PeerRecord;
use weft_types::PeerId;

use super::{blob32, not_found, peer_id_col};
use crate::{DbError, Result};

const COLS: &str =
    "peer_id, signing_key, agreement_key, last_seen, reputation, blacklisted, bootstrap_hints";

/// Insert or update a peer record.
pub fn upsert(conn: &Connection, peer: &PeerRecord) -> Result<()> {
    let hints = serde_json::to_string(&peer.bootstrap_hints)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO peers
             (peer_id, signing_key, agreement_key, last_seen, reputation, blacklisted, bootstrap_hints)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(peer_id) DO UPDATE SET
             signing_key = excluded.signing_key,
             agreement_key = excluded.agreement_key,
             last_seen = excluded.last_seen,
             reputation = excluded.reputation,
             blacklisted = excluded.blacklisted,
             bootstrap_hints = excluded.bootstrap_hints",
        rusqlite::params![
            peer.peer_id.to_hex(),
            peer.signing_key.as_slice(),
            peer.agreement_key.as_ref().map(|k| k.as_slice()),
            peer.last_seen_ms as i64,
            peer.reputation,
            peer.blacklisted,
            hints,
        ],
    )?;
    Ok(())
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerRecord> {
    let agreement_key = match row.get::<_, Option<Vec<u8>>>(2)? {
        Some(raw) => Some(blob32(2, raw)?),
        None => None,
    };
    let hints_json: String = row.get(6)?;
    let bootstrap_hints: Vec<String> =
        serde_json::from_str(&hints_json).unwrap_or_default();
    Ok(PeerRecord {
        peer_id: peer_id_col(0, row.get::<_, String>(0)?)?,
        signing_key: blob32(1, row.get::<_, Vec<u8>>(1)?)?,
        agreement_key,
        last_seen_ms: row.get::<_, i64>(3)? as u64,
        reputation: row.get(4)?,
        blacklisted: row.get(5)?,
        bootstrap_hints,
    })
}

/// Get a peer by ID.
pub fn get(conn: &Connection, peer_id: &PeerId) -> Result<PeerRecord> {
    conn.query_row(
        &format!("SELECT {COLS} FROM peers WHERE peer_id = ?1"),
        [peer_id.to_hex()],
        row_to_peer,
    )
    .map_err(not_found("peer"))
}

/// List all peers.
pub fn list(conn: &Connection) -> Result<Vec<PeerRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLS} FROM peers ORDER BY last_seen DESC"))?;
    let rows = stmt
        .query_map([], row_to_peer)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a peer.
pub fn delete(conn: &Connection, peer_id: &PeerId) -> Result<()> {
    conn.execute("DELETE FROM peers WHERE peer_id = ?1", [peer_id.to_hex()])?;
    Ok(())
}

/// Remove peers not seen since `cutoff_ms`, keeping blacklisted ones.
///
/// Blacklist entries outlive staleness so a hostile peer cannot reset its
/// standing by going quiet.
pub fn prune_stale(conn: &Connection, cutoff_ms: u64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM peers WHERE last_seen < ?1 AND blacklisted = 0",
        [cutoff_ms as i64],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(byte: u8) -> PeerRecord {
        PeerRecord::sighted(PeerId::from_bytes([byte; 32]), 1000)
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = crate::open_memory().expect("open");
        let mut peer = sample(1);
        peer.agreement_key = Some([8u8; 32]);
        peer.bootstrap_hints = vec!["tcp:192.0.2.1:4000".into()];
        upsert(&conn, &peer).expect("upsert");

        let loaded = get(&conn, &peer.peer_id).expect("get");
        assert_eq!(loaded.agreement_key, Some([8u8; 32]));
        assert_eq!(loaded.bootstrap_hints, peer.bootstrap_hints);
        assert_eq!(loaded.reputation, peer.reputation);
    }

    #[test]
    fn test_missing_agreement_key() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &sample(1)).expect("upsert");
        assert!(get(&conn, &sample(1).peer_id).expect("get").agreement_key.is_none());
    }

    #[test]
    fn test_prune_stale_keeps_blacklisted() {
        let conn = crate::open_memory().expect("open");
        let mut stale = sample(1);
        stale.last_seen_ms = 100;
        let mut hostile = sample(2);
        hostile.last_seen_ms = 100;
        hostile.blacklisted = true;
        let mut fresh = sample(3);
        fresh.last_seen_ms = 9000;

        for p in [&stale, &hostile, &fresh] {
            upsert(&conn, p).expect("upsert");
        }

        let pruned = prune_stale(&conn, 5000).expect("prune");
        assert_eq!(pruned, 1);

        let remaining = list(&conn).expect("list");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|p| p.blacklisted));
    }

    #[test]
    fn test_delete() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &sample(1)).expect("upsert");
        delete(&conn, &sample(1).peer_id).expect("delete");
        assert!(matches!(
            get(&conn, &sample(1).peer_id),
            Err(crate::DbError::NotFound(_))
        ));
    }
}
