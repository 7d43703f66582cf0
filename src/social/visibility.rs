//! Per-request visibility sets. Nothing here is cached; both sets are
//! recomputed from the current follow/block rows on every call.
//!
//! Blocking is asymmetric: a viewer only hides users *they* blocked. Content
//! from a user who has blocked the viewer stays visible to the viewer.

use rusqlite::{params, Connection};
use std::collections::HashSet;

/// Users the viewer has blocked. Their posts and activities are hidden from
/// every listing the viewer sees.
pub fn hidden_set(conn: &Connection, viewer_id: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT blocked_id FROM blocks WHERE blocker_id = ?1")?;
    let rows = stmt.query_map(params![viewer_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// The viewer's own id plus every user they follow.
pub fn network(conn: &Connection, viewer_id: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT following_id FROM follows WHERE follower_id = ?1")?;
    let rows = stmt.query_map(params![viewer_id], |row| row.get::<_, String>(0))?;

    let mut ids: HashSet<String> = rows.collect::<rusqlite::Result<_>>()?;
    ids.insert(viewer_id.to_string());
    Ok(ids)
}
