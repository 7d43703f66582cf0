use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db;
use crate::db::models::{ActivityType, Post};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::social::{activity, feed, permissions, visibility};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", delete(delete_post))
        .route("/posts/{id}/like", post(like_post).delete(unlike_post))
        .route("/follows", get(list_follows).post(create_follow))
        .route("/follows/{id}", delete(delete_follow))
        .route("/blocks", get(list_blocks).post(create_block))
        .route("/blocks/{id}", delete(delete_block))
        .route("/activities", get(list_activities))
        .route("/likes", get(list_likes))
        .route("/likes/{id}", delete(delete_like))
}

fn fetch_post(conn: &Connection, id: &str) -> AppResult<Post> {
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1", Post::COLUMNS),
        params![id],
        Post::from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

fn username_of(conn: &Connection, user_id: &str) -> AppResult<String> {
    conn.query_row(
        "SELECT username FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

// -- Posts --

#[derive(Deserialize)]
struct PostListQuery {
    user_id: Option<String>,
}

async fn list_posts(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Query(query): Query<PostListQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    let posts = feed::visible_posts(
        &conn,
        &viewer.id,
        viewer.role.is_admin(),
        &hidden,
        query.user_id.as_deref(),
        None,
    )?;
    Ok(Json(posts).into_response())
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    pub content: Option<String>,
    pub image_path: Option<String>,
}

/// Insert the post and its log entry in one transaction. Shared with the
/// HTML create-post page.
pub fn create_post_for(
    state: &AppState,
    viewer: &CurrentUser,
    req: &CreatePostRequest,
) -> AppResult<String> {
    let content = req.content.as_deref().unwrap_or("").trim().to_string();
    if content.is_empty() {
        return Err(AppError::field("content", "This field is required."));
    }

    let mut conn = state.db.get()?;
    let post_id = uuid::Uuid::now_v7().to_string();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO posts (id, user_id, content, image_path) VALUES (?1, ?2, ?3, ?4)",
        params![post_id, viewer.id, content, req.image_path],
    )?;
    activity::record(
        &tx,
        ActivityType::PostCreated,
        &viewer.id,
        None,
        None,
        &format!("{} made a post", viewer.username),
    )?;
    tx.commit()?;

    Ok(post_id)
}

async fn create_post(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<Response> {
    let post_id = create_post_for(&state, &viewer, &req)?;

    let conn = state.db.get()?;
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    let mut posts = feed::visible_posts(
        &conn,
        &viewer.id,
        viewer.role.is_admin(),
        &hidden,
        Some(&viewer.id),
        None,
    )?;
    posts.retain(|p| p.id == post_id);
    let created = posts
        .pop()
        .ok_or_else(|| AppError::Internal("created post not found".into()))?;

    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn delete_post(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;
    let post = fetch_post(&conn, &id)?;

    // A post the viewer cannot see cannot be deleted either, even by an
    // admin who blocked its author
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    if hidden.contains(&post.user_id) {
        return Err(AppError::NotFound);
    }

    if !permissions::can_delete(&viewer, &post.user_id) {
        return Err(AppError::Forbidden);
    }

    // The log row commits with the deletion; its post reference goes NULL as
    // the post disappears
    let tx = conn.transaction()?;
    activity::record(
        &tx,
        ActivityType::PostDeleted,
        &viewer.id,
        Some(&post.user_id),
        Some(&post.id),
        &format!("Post deleted by '{}'", viewer.username),
    )?;
    tx.execute("DELETE FROM posts WHERE id = ?1", params![post.id])?;
    tx.commit()?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Likes --

/// Like a post. Returns true when this call created the like; a repeated
/// like (including one that loses a first-like race) is a no-op. Shared with
/// the HTML UI.
pub fn like_post_for(state: &AppState, viewer: &CurrentUser, post_id: &str) -> AppResult<bool> {
    let mut conn = state.db.get()?;
    let post = fetch_post(&conn, post_id)?;

    // A blocked author's posts are invisible, so liking one is a 404
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    if hidden.contains(&post.user_id) {
        return Err(AppError::NotFound);
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM likes WHERE user_id = ?1 AND post_id = ?2",
            params![viewer.id, post.id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(false);
    }

    let author = username_of(&conn, &post.user_id)?;

    let tx = conn.transaction()?;
    if let Err(e) = tx.execute(
        "INSERT INTO likes (id, user_id, post_id) VALUES (?1, ?2, ?3)",
        params![uuid::Uuid::now_v7().to_string(), viewer.id, post.id],
    ) {
        // Lost a first-like race; the unique pair constraint held and the
        // winner already recorded the activity
        if db::is_unique_violation(&e) {
            return Ok(false);
        }
        return Err(e.into());
    }
    activity::record(
        &tx,
        ActivityType::PostLiked,
        &viewer.id,
        Some(&post.user_id),
        Some(&post.id),
        &format!("{} liked {}'s post", viewer.username, author),
    )?;
    tx.commit()?;

    Ok(true)
}

async fn like_post(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    if like_post_for(&state, &viewer, &id)? {
        Ok((StatusCode::CREATED, Json(json!({"message": "Post liked"}))).into_response())
    } else {
        Ok(Json(json!({"message": "Already liked"})).into_response())
    }
}

async fn unlike_post(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let post = fetch_post(&conn, &id)?;

    // Blocked authors' posts are invisible to unlike too
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    if hidden.contains(&post.user_id) {
        return Err(AppError::NotFound);
    }

    // No activity for unlikes
    conn.execute(
        "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
        params![viewer.id, post.id],
    )?;
    Ok(Json(json!({"message": "Post unliked"})).into_response())
}

#[derive(Serialize)]
struct LikeOut {
    id: String,
    user: String,
    post: String,
    created_at: String,
}

async fn list_likes(State(state): State<AppState>, viewer: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT l.id, u.username, l.post_id, l.created_at
         FROM likes l JOIN users u ON u.id = l.user_id
         WHERE l.user_id = ?1
         ORDER BY l.created_at DESC, l.id DESC",
    )?;
    let likes: Vec<LikeOut> = stmt
        .query_map(params![viewer.id], |row| {
            Ok(LikeOut {
                id: row.get(0)?,
                user: row.get(1)?,
                post: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(Json(likes).into_response())
}

async fn delete_like(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM likes WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let owner = owner.ok_or(AppError::NotFound)?;

    if !permissions::can_delete(&viewer, &owner) {
        return Err(AppError::Forbidden);
    }

    conn.execute("DELETE FROM likes WHERE id = ?1", params![id])?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Follows --

#[derive(Serialize)]
struct FollowOut {
    id: String,
    follower: String,
    follower_id: String,
    following: String,
    following_id: String,
    created_at: String,
}

fn fetch_follow_out(conn: &Connection, id: &str) -> AppResult<FollowOut> {
    conn.query_row(
        "SELECT f.id, fu.username, f.follower_id, gu.username, f.following_id, f.created_at
         FROM follows f
         JOIN users fu ON fu.id = f.follower_id
         JOIN users gu ON gu.id = f.following_id
         WHERE f.id = ?1",
        params![id],
        |row| {
            Ok(FollowOut {
                id: row.get(0)?,
                follower: row.get(1)?,
                follower_id: row.get(2)?,
                following: row.get(3)?,
                following_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

async fn list_follows(State(state): State<AppState>, viewer: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT f.id, fu.username, f.follower_id, gu.username, f.following_id, f.created_at
         FROM follows f
         JOIN users fu ON fu.id = f.follower_id
         JOIN users gu ON gu.id = f.following_id
         WHERE f.follower_id = ?1
         ORDER BY f.created_at DESC, f.id DESC",
    )?;
    let follows: Vec<FollowOut> = stmt
        .query_map(params![viewer.id], |row| {
            Ok(FollowOut {
                id: row.get(0)?,
                follower: row.get(1)?,
                follower_id: row.get(2)?,
                following: row.get(3)?,
                following_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(Json(follows).into_response())
}

#[derive(Deserialize)]
pub struct CreateFollowRequest {
    pub following_id: Option<String>,
}

/// Follow a user. Returns the follow id and whether it was newly created.
/// Shared with the HTML profile page.
pub fn follow_user(
    state: &AppState,
    viewer: &CurrentUser,
    following_id: &str,
) -> AppResult<(String, bool)> {
    if following_id == viewer.id {
        return Err(AppError::BadRequest("Cannot follow yourself".into()));
    }

    let mut conn = state.db.get()?;
    let target_name = username_of(&conn, following_id)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![viewer.id, following_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    let follow_id = uuid::Uuid::now_v7().to_string();
    let tx = conn.transaction()?;
    if let Err(e) = tx.execute(
        "INSERT INTO follows (id, follower_id, following_id) VALUES (?1, ?2, ?3)",
        params![follow_id, viewer.id, following_id],
    ) {
        // Lost a first-follow race; the unique pair constraint held, so
        // report the row the winner created
        if db::is_unique_violation(&e) {
            drop(tx);
            let id = conn.query_row(
                "SELECT id FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![viewer.id, following_id],
                |row| row.get(0),
            )?;
            return Ok((id, false));
        }
        return Err(e.into());
    }
    activity::record(
        &tx,
        ActivityType::UserFollowed,
        &viewer.id,
        Some(following_id),
        None,
        &format!("{} followed {}", viewer.username, target_name),
    )?;
    tx.commit()?;

    Ok((follow_id, true))
}

async fn create_follow(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Json(req): Json<CreateFollowRequest>,
) -> AppResult<Response> {
    let following_id = req
        .following_id
        .ok_or_else(|| AppError::BadRequest("following_id is required".into()))?;

    let (follow_id, created) = follow_user(&state, &viewer, &following_id)?;
    if !created {
        return Ok(Json(json!({"message": "Already following"})).into_response());
    }

    let conn = state.db.get()?;
    let out = fetch_follow_out(&conn, &follow_id)?;
    Ok((StatusCode::CREATED, Json(out)).into_response())
}

async fn delete_follow(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let follower: Option<String> = conn
        .query_row(
            "SELECT follower_id FROM follows WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let follower = follower.ok_or(AppError::NotFound)?;

    if follower != viewer.id {
        return Err(AppError::Forbidden);
    }

    // No activity for unfollows
    conn.execute("DELETE FROM follows WHERE id = ?1", params![id])?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Blocks --

#[derive(Serialize)]
struct BlockOut {
    id: String,
    blocker: String,
    blocker_id: String,
    blocked: String,
    blocked_id: String,
    created_at: String,
}

fn fetch_block_out(conn: &Connection, id: &str) -> AppResult<BlockOut> {
    conn.query_row(
        "SELECT b.id, bu.username, b.blocker_id, du.username, b.blocked_id, b.created_at
         FROM blocks b
         JOIN users bu ON bu.id = b.blocker_id
         JOIN users du ON du.id = b.blocked_id
         WHERE b.id = ?1",
        params![id],
        |row| {
            Ok(BlockOut {
                id: row.get(0)?,
                blocker: row.get(1)?,
                blocker_id: row.get(2)?,
                blocked: row.get(3)?,
                blocked_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

async fn list_blocks(State(state): State<AppState>, viewer: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let mut stmt = conn.prepare(
        "SELECT b.id, bu.username, b.blocker_id, du.username, b.blocked_id, b.created_at
         FROM blocks b
         JOIN users bu ON bu.id = b.blocker_id
         JOIN users du ON du.id = b.blocked_id
         WHERE b.blocker_id = ?1
         ORDER BY b.created_at DESC, b.id DESC",
    )?;
    let blocks: Vec<BlockOut> = stmt
        .query_map(params![viewer.id], |row| {
            Ok(BlockOut {
                id: row.get(0)?,
                blocker: row.get(1)?,
                blocker_id: row.get(2)?,
                blocked: row.get(3)?,
                blocked_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(Json(blocks).into_response())
}

#[derive(Deserialize)]
pub struct CreateBlockRequest {
    pub blocked_id: Option<String>,
}

/// Block a user. On first block the follow and like cleanup cascades run in
/// the same transaction; a repeat block is a no-op returning the existing row.
pub fn block_user(
    state: &AppState,
    viewer: &CurrentUser,
    blocked_id: &str,
) -> AppResult<(String, bool)> {
    if blocked_id == viewer.id {
        return Err(AppError::BadRequest("Cannot block yourself".into()));
    }

    let mut conn = state.db.get()?;
    // 404 for unknown targets
    username_of(&conn, blocked_id)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
            params![viewer.id, blocked_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    let block_id = uuid::Uuid::now_v7().to_string();
    let tx = conn.transaction()?;
    if let Err(e) = tx.execute(
        "INSERT INTO blocks (id, blocker_id, blocked_id) VALUES (?1, ?2, ?3)",
        params![block_id, viewer.id, blocked_id],
    ) {
        // Lost a first-block race; the winner already ran the cleanup
        // cascade, so just report its row
        if db::is_unique_violation(&e) {
            drop(tx);
            let id = conn.query_row(
                "SELECT id FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                params![viewer.id, blocked_id],
                |row| row.get(0),
            )?;
            return Ok((id, false));
        }
        return Err(e.into());
    }
    // One-time cleanup in the blocker's direction only: drop the follow and
    // any likes the blocker left on the blocked user's posts. No activity is
    // recorded for blocks.
    tx.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
        params![viewer.id, blocked_id],
    )?;
    tx.execute(
        "DELETE FROM likes WHERE user_id = ?1
         AND post_id IN (SELECT id FROM posts WHERE user_id = ?2)",
        params![viewer.id, blocked_id],
    )?;
    tx.commit()?;

    Ok((block_id, true))
}

async fn create_block(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Json(req): Json<CreateBlockRequest>,
) -> AppResult<Response> {
    let blocked_id = req
        .blocked_id
        .ok_or_else(|| AppError::BadRequest("blocked_id is required".into()))?;

    let (block_id, created) = block_user(&state, &viewer, &blocked_id)?;
    if !created {
        return Ok(Json(json!({"message": "Already blocked"})).into_response());
    }

    let conn = state.db.get()?;
    let out = fetch_block_out(&conn, &block_id)?;
    Ok((StatusCode::CREATED, Json(out)).into_response())
}

async fn delete_block(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let blocker: Option<String> = conn
        .query_row(
            "SELECT blocker_id FROM blocks WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let blocker = blocker.ok_or(AppError::NotFound)?;

    if blocker != viewer.id {
        return Err(AppError::Forbidden);
    }

    // Lifting a block does not restore removed follows or likes
    conn.execute("DELETE FROM blocks WHERE id = ?1", params![id])?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Activities --

async fn list_activities(
    State(state): State<AppState>,
    viewer: CurrentUser,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let network = visibility::network(&conn, &viewer.id)?;
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    let candidates: std::collections::HashSet<String> =
        network.difference(&hidden).cloned().collect();

    let activities = feed::recent_activities(&conn, &candidates, feed::FEED_LIMIT)?;
    Ok(Json(activities).into_response())
}
