//! Feed composition: two independently time-ordered lists (activities and
//! posts), each with a flat top-50 cutoff and no pagination cursor.

use rusqlite::types::ToSql;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashSet;

use crate::social::visibility;

pub const FEED_LIMIT: usize = 50;

/// Activity with actor and target usernames resolved for display. Usernames
/// are None when the referenced user has been deleted.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityView {
    pub id: String,
    pub activity_type: String,
    pub actor: Option<String>,
    pub target_user: Option<String>,
    pub target_post: Option<String>,
    pub description: String,
    pub created_at: String,
}

/// Post with its author, like state, and delete permission resolved for the
/// given viewer.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: String,
    pub user: String,
    pub user_id: String,
    pub user_role: String,
    pub content: String,
    pub image_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub likes_count: i64,
    pub is_liked: bool,
    pub can_delete: bool,
}

#[derive(Debug, Serialize)]
pub struct Feed {
    pub activities: Vec<ActivityView>,
    pub posts: Vec<PostView>,
}

/// Compose the viewer's feed.
///
/// Activities are restricted to the viewer's network minus anyone they
/// blocked (a single set difference). Posts are broader on purpose: any
/// non-blocked user's posts appear, followed or not.
pub fn compose_feed(
    conn: &Connection,
    viewer_id: &str,
    viewer_is_admin: bool,
) -> rusqlite::Result<Feed> {
    let network = visibility::network(conn, viewer_id)?;
    let hidden = visibility::hidden_set(conn, viewer_id)?;
    let candidates: HashSet<String> = network.difference(&hidden).cloned().collect();

    let activities = recent_activities(conn, &candidates, FEED_LIMIT)?;
    let posts = visible_posts(
        conn,
        viewer_id,
        viewer_is_admin,
        &hidden,
        None,
        Some(FEED_LIMIT),
    )?;

    Ok(Feed { activities, posts })
}

/// Newest activities whose actor is in `actors`, newest-first. Deleted actors
/// (actor_id NULL) never match, so orphaned log rows stay out of feeds.
pub fn recent_activities(
    conn: &Connection,
    actors: &HashSet<String>,
    limit: usize,
) -> rusqlite::Result<Vec<ActivityView>> {
    if actors.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; actors.len()].join(", ");
    let sql = format!(
        "SELECT a.id, a.activity_type, actor.username, target.username, a.target_post_id,
                a.description, a.created_at
         FROM activities a
         LEFT JOIN users actor ON actor.id = a.actor_id
         LEFT JOIN users target ON target.id = a.target_user_id
         WHERE a.actor_id IN ({placeholders})
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT {limit}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(actors.iter()), |row| {
        Ok(ActivityView {
            id: row.get(0)?,
            activity_type: row.get(1)?,
            actor: row.get(2)?,
            target_user: row.get(3)?,
            target_post: row.get(4)?,
            description: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    rows.collect()
}

/// Posts visible to the viewer: everyone's except owners in `hidden`,
/// newest-first. Optionally restricted to a single author and capped.
pub fn visible_posts(
    conn: &Connection,
    viewer_id: &str,
    viewer_is_admin: bool,
    hidden: &HashSet<String>,
    author_id: Option<&str>,
    limit: Option<usize>,
) -> rusqlite::Result<Vec<PostView>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<&dyn ToSql> = vec![&viewer_id];

    if !hidden.is_empty() {
        let placeholders = vec!["?"; hidden.len()].join(", ");
        clauses.push(format!("p.user_id NOT IN ({placeholders})"));
        params.extend(hidden.iter().map(|id| id as &dyn ToSql));
    }
    if let Some(ref author) = author_id {
        clauses.push("p.user_id = ?".to_string());
        params.push(author);
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let limit_clause = limit
        .map(|n| format!("LIMIT {n}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT p.id, u.username, p.user_id, u.role, p.content, p.image_path,
                p.created_at, p.updated_at,
                (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id),
                EXISTS(SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?)
         FROM posts p
         JOIN users u ON u.id = p.user_id
         {where_clause}
         ORDER BY p.created_at DESC, p.id DESC
         {limit_clause}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        let user_id: String = row.get(2)?;
        Ok(PostView {
            id: row.get(0)?,
            user: row.get(1)?,
            can_delete: viewer_is_admin || user_id == viewer_id,
            user_id,
            user_role: row.get(3)?,
            content: row.get(4)?,
            image_path: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            likes_count: row.get(8)?,
            is_liked: row.get(9)?,
        })
    })?;
    rows.collect()
}
