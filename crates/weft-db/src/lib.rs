//! # weft-db
//!
//! SQLite persistence adapter for the Weft mesh engine. Owns the single
//! database file holding identities, peers, routes, session keys, the
//! store-and-forward queue, conversations, and messages.
//!
//! - WAL mode, foreign keys enforced, schema version in `PRAGMA
//!   user_version`
//! - All timestamps are unix epoch milliseconds stored as `INTEGER`
//! - Operations are atomic per key; bulk import runs in one transaction
//! - The export snapshot (see [`snapshot`]) is the authoritative persisted
//!   state shape; backends are free in their internal layout

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod snapshot;

use std::path::Path;

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("invalid scrub token")]
    BadScrubToken,

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the Weft database at the given path.
///
/// Configures WAL mode and foreign keys, then runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

/// Issue a fresh scrub token authorizing a subsequent [`delete_all`].
///
/// The token is single-use and recorded in the database; `delete_all`
/// refuses anything else. This keeps a full wipe behind two deliberate
/// calls.
pub fn request_scrub(conn: &Connection) -> Result<String> {
    let mut raw = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut raw);
    let token = hex::encode(raw);
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('scrub_token', ?1)",
        [&token],
    )?;
    Ok(token)
}

/// Delete every row in every table, verifying the scrub token first.
pub fn delete_all(conn: &mut Connection, token: &str) -> Result<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'scrub_token'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(DbError::Sqlite(other)),
        })?;

    match stored {
        Some(expected) if expected == token => {}
        _ => return Err(DbError::BadScrubToken),
    }

    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM messages;
         DELETE FROM conversations;
         DELETE FROM queued_messages;
         DELETE FROM session_keys;
         DELETE FROM routes;
         DELETE FROM peers;
         DELETE FROM identities;
         DELETE FROM meta;",
    )?;
    tx.commit()?;
    tracing::warn!("database scrubbed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_scrub_requires_token() {
        let mut conn = open_memory().expect("open");
        assert!(matches!(
            delete_all(&mut conn, "not-a-token"),
            Err(DbError::BadScrubToken)
        ));
    }

    #[test]
    fn test_scrub_with_fresh_token() {
        let mut conn = open_memory().expect("open");
        let token = request_scrub(&conn).expect("token");
        delete_all(&mut conn, &token).expect("scrub");
        // Token is consumed with the meta table.
        assert!(matches!(
            delete_all(&mut conn, &token),
            Err(DbError::BadScrubToken)
        ));
    }

    #[test]
    fn test_stale_token_rejected_after_reissue() {
        let mut conn = open_memory().expect("open");
        let old = request_scrub(&conn).expect("token");
        let _new = request_scrub(&conn).expect("token");
        assert!(matches!(
            delete_all(&mut conn, &old),
            Err(DbError::BadScrubToken)
        ));
    }
}
