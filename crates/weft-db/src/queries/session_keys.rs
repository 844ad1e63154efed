//! Session-key query functions.

use rusqlite::Connection;

use weft_types::session::{KeyDirection, SessionKeyRecord};
use weft_types::PeerId;

use super::{blob32, peer_id_col};
use crate::Result;

const COLS: &str = "peer_id, direction, rotation, key, created_at, expires_at";

/// Insert or update one direction of a session key.
pub fn upsert(conn: &Connection, record: &SessionKeyRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO session_keys (peer_id, direction, rotation, key, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(peer_id, direction, rotation) DO UPDATE SET
             key = excluded.key,
             created_at = excluded.created_at,
             expires_at = excluded.expires_at",
        rusqlite::params![
            record.peer_id.to_hex(),
            record.direction.as_str(),
            record.rotation,
            record.key.as_slice(),
            record.created_at_ms as i64,
            record.expires_at_ms as i64,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionKeyRecord> {
    let direction_str: String = row.get(1)?;
    let direction = KeyDirection::from_str_persisted(&direction_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            "direction must be tx or rx".into(),
        )
    })?;
    Ok(SessionKeyRecord {
        peer_id: peer_id_col(0, row.get::<_, String>(0)?)?,
        direction,
        rotation: row.get(2)?,
        key: blob32(3, row.get::<_, Vec<u8>>(3)?)?,
        created_at_ms: row.get::<_, i64>(4)? as u64,
        expires_at_ms: row.get::<_, i64>(5)? as u64,
    })
}

/// List all key records for a peer, newest rotation first.
pub fn list_for_peer(conn: &Connection, peer_id: &PeerId) -> Result<Vec<SessionKeyRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM session_keys WHERE peer_id = ?1 ORDER BY rotation DESC"
    ))?;
    let rows = stmt
        .query_map([peer_id.to_hex()], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// List all key records.
pub fn list(conn: &Connection) -> Result<Vec<SessionKeyRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLS} FROM session_keys"))?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete every key shared with a peer (peer delete destroys its keys).
pub fn delete_for_peer(conn: &Connection, peer_id: &PeerId) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM session_keys WHERE peer_id = ?1",
        [peer_id.to_hex()],
    )?;
    Ok(n)
}

/// Remove expired keys. Returns the number removed.
pub fn prune_expired(conn: &Connection, now_ms: u64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM session_keys WHERE expires_at <= ?1",
        [now_ms as i64],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(peer: u8, direction: KeyDirection, rotation: u32) -> SessionKeyRecord {
        SessionKeyRecord {
            peer_id: PeerId::from_bytes([peer; 32]),
            key: [rotation as u8; 32],
            direction,
            rotation,
            created_at_ms: 1000,
            expires_at_ms: 10_000,
        }
    }

    #[test]
    fn test_upsert_and_list() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &record(1, KeyDirection::Tx, 0)).expect("upsert");
        upsert(&conn, &record(1, KeyDirection::Rx, 0)).expect("upsert");
        upsert(&conn, &record(1, KeyDirection::Tx, 1)).expect("upsert");

        let keys = list_for_peer(&conn, &PeerId::from_bytes([1; 32])).expect("list");
        assert_eq!(keys.len(), 3);
        // Newest rotation first.
        assert_eq!(keys[0].rotation, 1);
    }

    #[test]
    fn test_delete_for_peer() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &record(1, KeyDirection::Tx, 0)).expect("upsert");
        upsert(&conn, &record(2, KeyDirection::Tx, 0)).expect("upsert");

        assert_eq!(
            delete_for_peer(&conn, &PeerId::from_bytes([1; 32])).expect("delete"),
            1
        );
        assert_eq!(list(&conn).expect("list").len(), 1);
    }

    #[test]
    fn test_prune_expired() {
        let conn = crate::open_memory().expect("open");
        let mut old = record(1, KeyDirection::Tx, 0);
        old.expires_at_ms = 500;
        upsert(&conn, &old).expect("upsert");
        upsert(&conn, &record(2, KeyDirection::Tx, 0)).expect("upsert");

        assert_eq!(prune_expired(&conn, 1000).expect("prune"), 1);
        assert_eq!(list(&conn).expect("list").len(), 1);
    }
}
