//! Identity query functions.

use rusqlite::Connection;

use weft_types::identity::Identity;
use weft_types::PeerId;

use super::{blob32, not_found, peer_id_col};
use crate::Result;

/// Insert or update an identity.
pub fn upsert(conn: &Connection, identity: &Identity, primary: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO identities
             (peer_id, signing_seed, agreement_secret, display_name, created_at, is_primary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(peer_id) DO UPDATE SET
             signing_seed = excluded.signing_seed,
             agreement_secret = excluded.agreement_secret,
             display_name = excluded.display_name,
             created_at = excluded.created_at,
             is_primary = excluded.is_primary",
        rusqlite::params![
            identity.peer_id.to_hex(),
            identity.signing_seed.as_slice(),
            identity.agreement_secret.as_slice(),
            identity.display_name,
            identity.created_at_ms as i64,
            primary,
        ],
    )?;
    Ok(())
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        peer_id: peer_id_col(0, row.get::<_, String>(0)?)?,
        signing_seed: blob32(1, row.get::<_, Vec<u8>>(1)?)?,
        agreement_secret: blob32(2, row.get::<_, Vec<u8>>(2)?)?,
        display_name: row.get(3)?,
        created_at_ms: row.get::<_, i64>(4)? as u64,
    })
}

const COLS: &str = "peer_id, signing_seed, agreement_secret, display_name, created_at";

/// Get an identity by peer ID.
pub fn get(conn: &Connection, peer_id: &PeerId) -> Result<Identity> {
    conn.query_row(
        &format!("SELECT {COLS} FROM identities WHERE peer_id = ?1"),
        [peer_id.to_hex()],
        row_to_identity,
    )
    .map_err(not_found("identity"))
}

/// Get the primary identity, if one exists.
pub fn get_primary(conn: &Connection) -> Result<Option<Identity>> {
    let result = conn.query_row(
        &format!("SELECT {COLS} FROM identities WHERE is_primary = 1 LIMIT 1"),
        [],
        row_to_identity,
    );
    match result {
        Ok(identity) => Ok(Some(identity)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(other) => Err(other.into()),
    }
}

/// List all identities.
pub fn list(conn: &Connection) -> Result<Vec<Identity>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {COLS} FROM identities ORDER BY created_at"))?;
    let rows = stmt
        .query_map([], row_to_identity)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete an identity.
pub fn delete(conn: &Connection, peer_id: &PeerId) -> Result<()> {
    conn.execute(
        "DELETE FROM identities WHERE peer_id = ?1",
        [peer_id.to_hex()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Identity {
        Identity {
            peer_id: PeerId::from_bytes([3u8; 32]),
            signing_seed: [1u8; 32],
            agreement_secret: [2u8; 32],
            display_name: "alice".into(),
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &sample(), true).expect("upsert");

        let loaded = get(&conn, &sample().peer_id).expect("get");
        assert_eq!(loaded.display_name, "alice");
        assert_eq!(loaded.signing_seed, [1u8; 32]);
    }

    #[test]
    fn test_get_primary() {
        let conn = crate::open_memory().expect("open");
        assert!(get_primary(&conn).expect("query").is_none());

        upsert(&conn, &sample(), true).expect("upsert");
        let primary = get_primary(&conn).expect("query").expect("some");
        assert_eq!(primary.peer_id, sample().peer_id);
    }

    #[test]
    fn test_missing_identity_is_not_found() {
        let conn = crate::open_memory().expect("open");
        let err = get(&conn, &PeerId::from_bytes([9; 32]));
        assert!(matches!(err, Err(crate::DbError::NotFound(_))));
    }

    #[test]
    fn test_upsert_overwrites() {
        let conn = crate::open_memory().expect("open");
        upsert(&conn, &sample(), true).expect("first");
        let mut renamed = sample();
        renamed.display_name = "alice2".into();
        upsert(&conn, &renamed, true).expect("second");
        assert_eq!(get(&conn, &sample().peer_id).expect("get").display_name, "alice2");
        assert_eq!(list(&conn).expect("list").len(), 1);
    }
}
