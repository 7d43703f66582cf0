//! Append-only activity log. Rows are written once and never updated or
//! deleted by the application; foreign keys go NULL when the referenced user
//! or post disappears.

use rusqlite::{params, Connection};

use crate::db::models::ActivityType;

/// Append one log entry. Takes a `Connection` so callers can run it inside
/// the same transaction as the primary write it describes.
pub fn record(
    conn: &Connection,
    activity_type: ActivityType,
    actor_id: &str,
    target_user_id: Option<&str>,
    target_post_id: Option<&str>,
    description: &str,
) -> rusqlite::Result<()> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO activities (id, activity_type, actor_id, target_user_id, target_post_id, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            activity_type.as_str(),
            actor_id,
            target_user_id,
            target_post_id,
            description
        ],
    )?;
    Ok(())
}
