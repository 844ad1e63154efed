//! Stored-message query functions.

use rusqlite::Connection;

use weft_types::message::{DeliveryStatus, StoredMessage};
use weft_types::{ConversationId, MessageId, MessageKind};

use super::{blob16, blob32, not_found, peer_id_col};
use crate::{DbError, Result};

const COLS: &str = "id, conversation_id, sender, recipient, kind, content, timestamp, status";

/// Insert or update a stored message.
pub fn upsert(conn: &Connection, msg: &StoredMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO messages
             (id, conversation_id, sender, recipient, kind, content, timestamp, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status",
        rusqlite::params![
            msg.id.as_slice(),
            msg.conversation_id.as_slice(),
            msg.sender.to_hex(),
            msg.recipient.to_hex(),
            msg.kind.as_u8(),
            msg.content,
            msg.timestamp_ms as i64,
            msg.status.as_str(),
        ],
    )?;
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let kind_byte: u8 = row.get(4)?;
    let kind = MessageKind::from_u8(kind_byte).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Integer,
            Box::new(e),
        )
    })?;
    let status_str: String = row.get(7)?;
    let status = DeliveryStatus::from_str_persisted(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            "unknown delivery status".into(),
        )
    })?;
    Ok(StoredMessage {
        id: blob16(0, row.get::<_, Vec<u8>>(0)?)?,
        conversation_id: blob32(1, row.get::<_, Vec<u8>>(1)?)?,
        sender: peer_id_col(2, row.get::<_, String>(2)?)?,
        recipient: peer_id_col(3, row.get::<_, String>(3)?)?,
        kind,
        content: row.get(5)?,
        timestamp_ms: row.get::<_, i64>(6)? as u64,
        status,
    })
}

/// Get a message by ID.
pub fn get(conn: &Connection, id: &MessageId) -> Result<StoredMessage> {
    conn.query_row(
        &format!("SELECT {COLS} FROM messages WHERE id = ?1"),
        [id.as_slice()],
        row_to_message,
    )
    .map_err(not_found("message"))
}

/// List a conversation's messages in timestamp order.
pub fn list_for_conversation(
    conn: &Connection,
    conversation_id: &ConversationId,
) -> Result<Vec<StoredMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC"
    ))?;
    let rows = stmt
        .query_map([conversation_id.as_slice()], row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// List all messages.
pub fn list(conn: &Connection) -> Result<Vec<StoredMessage>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {COLS} FROM messages ORDER BY timestamp ASC"))?;
    let rows = stmt
        .query_map([], row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Advance a message's delivery status.
///
/// Enforces the monotone state machine: an illegal transition (backwards,
/// or out of a terminal state) is rejected without touching the row.
pub fn update_status(
    conn: &Connection,
    id: &MessageId,
    next: DeliveryStatus,
) -> Result<DeliveryStatus> {
    let current = get(conn, id)?.status;
    if current == next {
        return Ok(current);
    }
    if !current.can_transition_to(next) {
        return Err(DbError::Serialization(format!(
            "illegal status transition {} -> {}",
            current.as_str(),
            next.as_str()
        )));
    }
    conn.execute(
        "UPDATE messages SET status = ?1 WHERE id = ?2",
        rusqlite::params![next.as_str(), id.as_slice()],
    )?;
    Ok(next)
}

/// Delete a message.
pub fn delete(conn: &Connection, id: &MessageId) -> Result<()> {
    conn.execute("DELETE FROM messages WHERE id = ?1", [id.as_slice()])?;
    Ok(())
}
