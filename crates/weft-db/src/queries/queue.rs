//! Store-and-forward queue persistence.
//!
//! The live queue runs in memory inside `weft-mesh`; this table mirrors it
//! so enqueued messages survive restarts.

use rusqlite::Connection;

use weft_types::queue::{Priority, QueuedMessage};
use weft_types::{MessageId, PeerId};

use super::{blob16, not_found, peer_id_col};
use crate::Result;

const COLS: &str =
    "id, destination, payload, priority, attempts, last_attempt_at, created_at, expires_at";

/// Insert or update a queued message.
pub fn upsert(conn: &Connection, msg: &QueuedMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO queued_messages
             (id, destination, payload, priority, attempts, last_attempt_at, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             attempts = excluded.attempts,
             last_attempt_at = excluded.last_attempt_at,
             expires_at = excluded.expires_at",
        rusqlite::params![
            msg.id.as_slice(),
            msg.destination.to_hex(),
            msg.payload,
            msg.priority.as_u8(),
            msg.attempts,
            msg.last_attempt_at_ms.map(|t| t as i64),
            msg.created_at_ms as i64,
            msg.expires_at_ms as i64,
        ],
    )?;
    Ok(())
}

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedMessage> {
    Ok(QueuedMessage {
        id: blob16(0, row.get::<_, Vec<u8>>(0)?)?,
        destination: peer_id_col(1, row.get::<_, String>(1)?)?,
        payload: row.get(2)?,
        priority: Priority::from_u8(row.get(3)?),
        attempts: row.get(4)?,
        last_attempt_at_ms: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
        created_at_ms: row.get::<_, i64>(6)? as u64,
        expires_at_ms: row.get::<_, i64>(7)? as u64,
    })
}

/// Get a queued message by ID.
pub fn get(conn: &Connection, id: &MessageId) -> Result<QueuedMessage> {
    conn.query_row(
        &format!("SELECT {COLS} FROM queued_messages WHERE id = ?1"),
        [id.as_slice()],
        row_to_msg,
    )
    .map_err(not_found("queued message"))
}

/// List the whole queue, priority first, then enqueue order.
pub fn list(conn: &Connection) -> Result<Vec<QueuedMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM queued_messages ORDER BY priority DESC, created_at ASC"
    ))?;
    let rows = stmt
        .query_map([], row_to_msg)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// List queued messages for one destination, in enqueue order.
pub fn list_for_destination(
    conn: &Connection,
    destination: &PeerId,
) -> Result<Vec<QueuedMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM queued_messages
         WHERE destination = ?1
         ORDER BY priority DESC, created_at ASC"
    ))?;
    let rows = stmt
        .query_map([destination.to_hex()], row_to_msg)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a queued message (delivered, expired, or cancelled).
pub fn delete(conn: &Connection, id: &MessageId) -> Result<()> {
    conn.execute(
        "DELETE FROM queued_messages WHERE id = ?1",
        [id.as_slice()],
    )?;
    Ok(())
}

/// Remove expired entries. Returns the number removed.
pub fn prune_expired(conn: &Connection, now_ms: u64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM queued_messages WHERE expires_at <= ?1",
        [now_ms as i64],
    )?;
    Ok(n)
}
