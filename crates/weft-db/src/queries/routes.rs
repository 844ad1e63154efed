//! Route query functions.
//!
//! The table keeps one row per destination: the route the engine currently
//! considers best. Candidate selection happens in the in-memory directory;
//! this table exists so routes survive restarts.

use rusqlite::Connection;

use weft_types::route::RouteEntry;
use weft_types::PeerId;

use super::{not_found, peer_id_col};
use crate::Result;

const COLS: &str = "destination, next_hop, hop_count, metric, expires_at";

/// Insert or replace the route for a destination.
pub fn upsert(conn: &Connection, route: &RouteEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO routes (destination, next_hop, hop_count, metric, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(destination) DO UPDATE SET
             next_hop = excluded.next_hop,
             hop_count = excluded.hop_count,
             metric = excluded.metric,
             expires_at = excluded.expires_at",
        rusqlite::params![
            route.destination.to_hex(),
            route.next_hop.to_hex(),
            route.hop_count,
            route.metric,
            route.expires_at_ms as i64,
        ],
    )?;
    Ok(())
}

fn row_to_route(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouteEntry> {
    Ok(RouteEntry {
        destination: peer_id_col(0, row.get::<_, String>(0)?)?,
        next_hop: peer_id_col(1, row.get::<_, String>(1)?)?,
        hop_count: row.get(2)?,
        metric: row.get(3)?,
        expires_at_ms: row.get::<_, i64>(4)? as u64,
    })
}

/// Get the route for a destination.
pub fn get(conn: &Connection, destination: &PeerId) -> Result<RouteEntry> {
    conn.query_row(
        &format!("SELECT {COLS} FROM routes WHERE destination = ?1"),
        [destination.to_hex()],
        row_to_route,
    )
    .map_err(not_found("route"))
}

/// List all routes.
pub fn list(conn: &Connection) -> Result<Vec<RouteEntry>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLS} FROM routes"))?;
    let rows = stmt
        .query_map([], row_to_route)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete the route for a destination.
pub fn delete(conn: &Connection, destination: &PeerId) -> Result<()> {
    conn.execute(
        "DELETE FROM routes WHERE destination = ?1",
        [destination.to_hex()],
    )?;
    Ok(())
}

/// Remove all routes whose next hop is the given peer (peer loss).
pub fn delete_via(conn: &Connection, next_hop: &PeerId) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM routes WHERE next_hop = ?1",
        [next_hop.to_hex()],
    )?;
    Ok(n)
}

/// Remove expired routes. Returns the number removed.
pub fn prune_expired(conn: &Connection, now_ms: u64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM routes WHERE expires_at <= ?1",
        [now_ms as i64],
    )?;
    Ok(n)
}
