//! Per-entity query modules.
//!
//! Each module owns the SQL for one table and maps rows onto the
//! `weft-types` structs. All timestamps cross the boundary as unix millis.

pub mod conversations;
pub mod identities;
pub mod messages;
pub mod peers;
pub mod queue;
pub mod routes;
pub mod session_keys;

use rusqlite::types::Type;

/// Convert a BLOB column into a fixed 32-byte array inside a row closure.
pub(crate) fn blob32(idx: usize, value: Vec<u8>) -> rusqlite::Result<[u8; 32]> {
    value.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            "expected 32-byte blob".into(),
        )
    })
}

/// Convert a BLOB column into a fixed 16-byte array inside a row closure.
pub(crate) fn blob16(idx: usize, value: Vec<u8>) -> rusqlite::Result<[u8; 16]> {
    value.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            "expected 16-byte blob".into(),
        )
    })
}

/// Parse a TEXT column as a peer ID inside a row closure.
pub(crate) fn peer_id_col(idx: usize, value: String) -> rusqlite::Result<weft_types::PeerId> {
    weft_types::PeerId::from_hex(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

/// Map `QueryReturnedNoRows` onto [`crate::DbError::NotFound`].
pub(crate) fn not_found(entity: &str) -> impl FnOnce(rusqlite::Error) -> crate::DbError + '_ {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => crate::DbError::NotFound(entity.to_string()),
        other => crate::DbError::Sqlite(other),
    }
}
