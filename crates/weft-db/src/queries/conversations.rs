//! Conversation query functions.

use rusqlite::Connection;

use weft_types::message::Conversation;
use weft_types::{ConversationId, PeerId};

use super::{blob32, not_found, peer_id_col};
use crate::Result;

const COLS: &str = "id, peer_id, created_at, last_activity";

/// Insert or update a conversation.
pub fn upsert(conn: &Connection, conversation: &Conversation) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (id, peer_id, created_at, last_activity)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             last_activity = excluded.last_activity",
        rusqlite::params![
            conversation.id.as_slice(),
            conversation.peer_id.to_hex(),
            conversation.created_at_ms as i64,
            conversation.last_activity_ms as i64,
        ],
    )?;
    Ok(())
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: blob32(0, row.get::<_, Vec<u8>>(0)?)?,
        peer_id: peer_id_col(1, row.get::<_, String>(1)?)?,
        created_at_ms: row.get::<_, i64>(2)? as u64,
        last_activity_ms: row.get::<_, i64>(3)? as u64,
    })
}

/// Get a conversation by ID.
pub fn get(conn: &Connection, id: &ConversationId) -> Result<Conversation> {
    conn.query_row(
        &format!("SELECT {COLS} FROM conversations WHERE id = ?1"),
        [id.as_slice()],
        row_to_conversation,
    )
    .map_err(not_found("conversation"))
}

/// List conversations, most recently active first.
pub fn list(conn: &Connection) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM conversations ORDER BY last_activity DESC"
    ))?;
    let rows = stmt
        .query_map([], row_to_conversation)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a conversation and (via cascade) its messages.
pub fn delete(conn: &Connection, id: &ConversationId) -> Result<()> {
    conn.execute("DELETE FROM conversations WHERE id = ?1", [id.as_slice()])?;
    Ok(())
}
