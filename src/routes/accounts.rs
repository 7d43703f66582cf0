use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::auth::{password, token};
use crate::db::models::{Role, User};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::social::activity;
use crate::social::permissions;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile))
        .route("/users", get(list_users))
        .route(
            "/users/{id}",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(delete_user),
        )
        .route("/admins", post(promote_admin))
        .route("/admins/{id}", axum::routing::delete(demote_admin))
}

// -- Serialized user shapes --

#[derive(Serialize)]
pub struct UserOut {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub bio: Option<String>,
    pub avatar_path: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub posts_count: i64,
    pub created_at: String,
    pub can_delete: bool,
    pub can_make_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_blocked: Option<bool>,
}

/// Serialize a user the way every listing shows it. `can_delete` and
/// `can_make_admin` are evaluated against the viewer.
pub fn serialize_user(
    conn: &Connection,
    user: &User,
    viewer: &CurrentUser,
) -> rusqlite::Result<UserOut> {
    let followers_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE following_id = ?1",
        params![user.id],
        |row| row.get(0),
    )?;
    let following_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
        params![user.id],
        |row| row.get(0),
    )?;
    let posts_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
        params![user.id],
        |row| row.get(0),
    )?;

    Ok(UserOut {
        id: user.id.clone(),
        username: user.username.clone(),
        email: user.email.clone(),
        role: user.role,
        bio: user.bio.clone(),
        avatar_path: user.avatar_path.clone(),
        followers_count,
        following_count,
        posts_count,
        created_at: user.created_at.clone(),
        can_delete: permissions::can_delete(viewer, &user.id),
        can_make_admin: permissions::can_promote_to_admin(viewer) && !user.role.is_owner(),
        is_following: None,
        is_blocked: None,
    })
}

/// Detail view adds the viewer's relationship to the user.
pub fn serialize_user_detail(
    conn: &Connection,
    user: &User,
    viewer: &CurrentUser,
) -> rusqlite::Result<UserOut> {
    let mut out = serialize_user(conn, user, viewer)?;

    let is_following: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM follows WHERE follower_id = ?1 AND following_id = ?2",
        params![viewer.id, user.id],
        |row| row.get(0),
    )?;
    let is_blocked: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
        params![viewer.id, user.id],
        |row| row.get(0),
    )?;

    out.is_following = Some(is_following);
    out.is_blocked = Some(is_blocked);
    Ok(out)
}

pub fn fetch_user(conn: &Connection, id: &str) -> AppResult<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
        params![id],
        User::from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

pub fn fetch_user_by_username(conn: &Connection, username: &str) -> AppResult<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", User::COLUMNS),
            params![username],
            User::from_row,
        )
        .optional()?)
}

// -- Registration and login --

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password2: Option<String>,
    pub bio: Option<String>,
    pub avatar_path: Option<String>,
}

/// Validate and create the account. Shared with the HTML register page.
pub fn create_account(
    state: &AppState,
    req: &RegisterRequest,
) -> AppResult<(User, String)> {
    let mut errors = BTreeMap::new();

    let username = req.username.as_deref().unwrap_or("").trim().to_string();
    let email = req.email.as_deref().unwrap_or("").trim().to_string();
    let pass = req.password.as_deref().unwrap_or("");
    let pass2 = req.password2.as_deref().unwrap_or("");

    if username.is_empty() {
        errors.insert("username".into(), "This field is required.".into());
    }
    if email.is_empty() {
        errors.insert("email".into(), "This field is required.".into());
    }
    if pass.is_empty() {
        errors.insert("password".into(), "This field is required.".into());
    } else if pass.len() < 8 {
        errors.insert(
            "password".into(),
            "Password must be at least 8 characters.".into(),
        );
    } else if pass != pass2 {
        errors.insert("password".into(), "Password fields didn't match.".into());
    }

    let conn = state.db.get()?;

    if !username.is_empty() {
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        if taken {
            errors.insert(
                "username".into(),
                "A user with that username already exists.".into(),
            );
        }
    }
    if !email.is_empty() {
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        if taken {
            errors.insert(
                "email".into(),
                "A user with that email already exists.".into(),
            );
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let hash = password::hash(pass)?;
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash, role, bio, avatar_path)
         VALUES (?1, ?2, ?3, ?4, 'regular', ?5, ?6)",
        params![id, username, email, hash, req.bio, req.avatar_path],
    )?;

    let user = fetch_user(&conn, &id)?;
    drop(conn);
    let api_token = token::get_or_create(&state.db, &id)?;
    Ok((user, api_token))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<Response> {
    let (user, api_token) = create_account(&state, &req)?;
    tracing::info!("Registered user '{}'", user.username);

    let conn = state.db.get()?;
    let viewer = CurrentUser {
        id: user.id.clone(),
        username: user.username.clone(),
        role: user.role,
    };
    let body = json!({
        "token": api_token,
        "user": serialize_user(&conn, &user, &viewer)?,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Check credentials and return the user with their API token. Shared with
/// the HTML login page.
pub fn authenticate(state: &AppState, req: &LoginRequest) -> AppResult<(User, String)> {
    let (username, pass) = match (req.username.as_deref(), req.password.as_deref()) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
        _ => return Err(AppError::Unauthorized),
    };

    let conn = state.db.get()?;
    let user = fetch_user_by_username(&conn, username)?.ok_or(AppError::Unauthorized)?;
    if !password::verify(pass, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }
    drop(conn);

    let api_token = token::get_or_create(&state.db, &user.id)?;
    Ok((user, api_token))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    let (user, api_token) = match authenticate(&state, &req) {
        Ok(ok) => ok,
        Err(AppError::Unauthorized) => {
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid credentials"})),
            )
                .into_response())
        }
        Err(e) => return Err(e),
    };

    let conn = state.db.get()?;
    let viewer = CurrentUser {
        id: user.id.clone(),
        username: user.username.clone(),
        role: user.role,
    };
    let body = json!({
        "token": api_token,
        "user": serialize_user(&conn, &user, &viewer)?,
    });
    Ok(Json(body).into_response())
}

// -- Profile and user CRUD --

async fn profile(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let me = fetch_user(&conn, &user.id)?;
    Ok(Json(serialize_user_detail(&conn, &me, &user)?).into_response())
}

async fn list_users(State(state): State<AppState>, viewer: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;

    // Blocked users stay listed; only their posts are hidden elsewhere
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY created_at ASC, id ASC",
        User::COLUMNS
    ))?;
    let users: Vec<User> = stmt
        .query_map([], User::from_row)?
        .collect::<rusqlite::Result<_>>()?;

    let out: Vec<UserOut> = users
        .iter()
        .map(|u| serialize_user(&conn, u, &viewer))
        .collect::<rusqlite::Result<_>>()?;
    Ok(Json(out).into_response())
}

async fn get_user(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = fetch_user(&conn, &id)?;
    Ok(Json(serialize_user_detail(&conn, &user, &viewer)?).into_response())
}

#[derive(Deserialize)]
struct UpdateUserRequest {
    email: Option<String>,
    bio: Option<String>,
    avatar_path: Option<String>,
}

async fn update_user(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = fetch_user(&conn, &id)?;

    // Profiles are editable by their owner or any admin; role is read-only here
    if !permissions::can_delete(&viewer, &user.id) {
        return Err(AppError::Forbidden);
    }

    if let Some(ref email) = req.email {
        let taken: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1 AND id != ?2",
            params![email, user.id],
            |row| row.get(0),
        )?;
        if taken {
            return Err(AppError::field(
                "email",
                "A user with that email already exists.",
            ));
        }
    }

    conn.execute(
        "UPDATE users SET
            email = COALESCE(?1, email),
            bio = COALESCE(?2, bio),
            avatar_path = COALESCE(?3, avatar_path),
            updated_at = datetime('now')
         WHERE id = ?4",
        params![req.email, req.bio, req.avatar_path, user.id],
    )?;

    let updated = fetch_user(&conn, &id)?;
    Ok(Json(serialize_user_detail(&conn, &updated, &viewer)?).into_response())
}

async fn delete_user(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;
    let user = fetch_user(&conn, &id)?;

    if !permissions::can_delete(&viewer, &user.id) {
        return Err(AppError::Forbidden);
    }

    // Log entry and deletion commit together; the target reference goes NULL
    // as the row disappears
    let tx = conn.transaction()?;
    activity::record(
        &tx,
        crate::db::models::ActivityType::UserDeleted,
        &viewer.id,
        Some(&user.id),
        None,
        &format!("User deleted by '{}'", viewer.username),
    )?;
    tx.execute("DELETE FROM users WHERE id = ?1", params![user.id])?;
    tx.commit()?;

    tracing::info!("User '{}' deleted by '{}'", user.username, viewer.username);
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Admin management (owner only) --

#[derive(Deserialize)]
struct PromoteRequest {
    user_id: Option<String>,
}

async fn promote_admin(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Json(req): Json<PromoteRequest>,
) -> AppResult<Response> {
    if !permissions::can_promote_to_admin(&viewer) {
        return Err(AppError::Forbidden);
    }

    let user_id = req
        .user_id
        .ok_or_else(|| AppError::BadRequest("user_id is required".into()))?;

    let conn = state.db.get()?;
    let user = fetch_user(&conn, &user_id)?;
    if !permissions::role_is_mutable(user.role) {
        return Err(AppError::BadRequest("Cannot modify owner role".into()));
    }

    conn.execute(
        "UPDATE users SET role = 'admin', updated_at = datetime('now') WHERE id = ?1",
        params![user.id],
    )?;
    tracing::info!("'{}' promoted '{}' to admin", viewer.username, user.username);

    let updated = fetch_user(&conn, &user_id)?;
    Ok(Json(serialize_user(&conn, &updated, &viewer)?).into_response())
}

async fn demote_admin(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    if !permissions::can_manage_admins(&viewer) {
        return Err(AppError::Forbidden);
    }

    let conn = state.db.get()?;
    let user = fetch_user(&conn, &id)?;
    if !permissions::role_is_mutable(user.role) {
        return Err(AppError::BadRequest("Cannot delete owner".into()));
    }

    // Demotion always lands on regular; there is no intermediate state
    conn.execute(
        "UPDATE users SET role = 'regular', updated_at = datetime('now') WHERE id = ?1",
        params![user.id],
    )?;
    tracing::info!("'{}' demoted '{}' to regular", viewer.username, user.username);

    Ok(StatusCode::NO_CONTENT.into_response())
}
