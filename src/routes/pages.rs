use askama::Template;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::auth::token;
use crate::error::{AppError, AppResult};
use crate::extractors::{self, CurrentUser, MaybeUser};
use crate::routes::accounts::{
    self, authenticate, create_account, LoginRequest, RegisterRequest, UserOut,
};
use crate::routes::social::{create_post_for, CreatePostRequest};
use crate::social::{feed, visibility};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/login", get(login_page).post(login_submit))
        .route("/register", get(register_page).post(register_submit))
        .route("/logout", post(logout))
        .route("/feed", get(feed_page))
        .route("/create-post", get(create_post_page).post(create_post_submit))
        .route("/users", get(users_page))
        .route("/users/{id}", get(profile_page))
}

/// Wrapper to render askama templates as axum responses.
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

fn session_cookie(state: &AppState, token: &str) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        state.config.auth.cookie_name,
        token,
        state.config.auth.session_hours * 3600
    )
}

fn clear_cookie(state: &AppState) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        state.config.auth.cookie_name
    )
}

async fn index(maybe_user: MaybeUser) -> Redirect {
    if maybe_user.0.is_some() {
        Redirect::to("/feed")
    } else {
        Redirect::to("/login")
    }
}

// -- Login / register / logout --

#[derive(Template)]
#[template(path = "pages/login.html")]
struct LoginTemplate {
    error: Option<String>,
}

async fn login_page(maybe_user: MaybeUser) -> Response {
    if maybe_user.0.is_some() {
        return Redirect::to("/feed").into_response();
    }
    Html(LoginTemplate { error: None }).into_response()
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let req = LoginRequest {
        username: Some(form.username),
        password: Some(form.password),
    };
    match authenticate(&state, &req) {
        Ok((_, api_token)) => Ok((
            [(header::SET_COOKIE, session_cookie(&state, &api_token))],
            Redirect::to("/feed"),
        )
            .into_response()),
        Err(AppError::Unauthorized) => Ok(Html(LoginTemplate {
            error: Some("Invalid username or password".into()),
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

#[derive(Template)]
#[template(path = "pages/register.html")]
struct RegisterTemplate {
    error: Option<String>,
}

async fn register_page(maybe_user: MaybeUser) -> Response {
    if maybe_user.0.is_some() {
        return Redirect::to("/feed").into_response();
    }
    Html(RegisterTemplate { error: None }).into_response()
}

#[derive(Deserialize)]
struct RegisterForm {
    username: String,
    email: String,
    password: String,
    password2: String,
    #[serde(default)]
    bio: String,
}

async fn register_submit(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    let bio = if form.bio.trim().is_empty() {
        None
    } else {
        Some(form.bio)
    };
    let req = RegisterRequest {
        username: Some(form.username),
        email: Some(form.email),
        password: Some(form.password),
        password2: Some(form.password2),
        bio,
        avatar_path: None,
    };
    match create_account(&state, &req) {
        Ok((_, api_token)) => Ok((
            [(header::SET_COOKIE, session_cookie(&state, &api_token))],
            Redirect::to("/feed"),
        )
            .into_response()),
        Err(AppError::Validation(errors)) => {
            let message = errors
                .into_iter()
                .map(|(field, msg)| format!("{}: {}", field, msg))
                .collect::<Vec<_>>()
                .join(" ");
            Ok(Html(RegisterTemplate {
                error: Some(message),
            })
            .into_response())
        }
        Err(e) => Err(e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    if let Some(tok) = extractors::cookie_token(&headers, &state.config.auth.cookie_name) {
        token::delete(&state.db, &tok)?;
    }
    Ok((
        [(header::SET_COOKIE, clear_cookie(&state))],
        Redirect::to("/login"),
    )
        .into_response())
}

// -- Feed and posts --

#[derive(Template)]
#[template(path = "pages/feed.html")]
struct FeedTemplate {
    username: String,
    activities: Vec<feed::ActivityView>,
    posts: Vec<feed::PostView>,
}

async fn feed_page(State(state): State<AppState>, viewer: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;
    let composed = feed::compose_feed(&conn, &viewer.id, viewer.role.is_admin())?;
    Ok(Html(FeedTemplate {
        username: viewer.username,
        activities: composed.activities,
        posts: composed.posts,
    })
    .into_response())
}

#[derive(Template)]
#[template(path = "pages/create_post.html")]
struct CreatePostTemplate {
    error: Option<String>,
}

async fn create_post_page(_viewer: CurrentUser) -> Response {
    Html(CreatePostTemplate { error: None }).into_response()
}

#[derive(Deserialize)]
struct CreatePostForm {
    content: String,
}

async fn create_post_submit(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Form(form): Form<CreatePostForm>,
) -> AppResult<Response> {
    let req = CreatePostRequest {
        content: Some(form.content),
        image_path: None,
    };
    match create_post_for(&state, &viewer, &req) {
        Ok(_) => Ok(Redirect::to("/feed").into_response()),
        Err(AppError::Validation(_)) => Ok(Html(CreatePostTemplate {
            error: Some("Post content is required".into()),
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

// -- Users --

#[derive(Template)]
#[template(path = "pages/users.html")]
struct UsersTemplate {
    username: String,
    users: Vec<UserOut>,
}

async fn users_page(State(state): State<AppState>, viewer: CurrentUser) -> AppResult<Response> {
    let conn = state.db.get()?;

    // Blocked users stay listed; only their posts are hidden
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY created_at ASC, id ASC",
        crate::db::models::User::COLUMNS
    ))?;
    let users: Vec<crate::db::models::User> = stmt
        .query_map([], crate::db::models::User::from_row)?
        .collect::<rusqlite::Result<_>>()?;

    let users: Vec<UserOut> = users
        .iter()
        .map(|u| accounts::serialize_user_detail(&conn, u, &viewer))
        .collect::<rusqlite::Result<_>>()?;

    Ok(Html(UsersTemplate {
        username: viewer.username,
        users,
    })
    .into_response())
}

#[derive(Template)]
#[template(path = "pages/profile.html")]
struct ProfileTemplate {
    username: String,
    profile: UserOut,
    posts: Vec<feed::PostView>,
    posts_hidden: bool,
}

async fn profile_page(
    State(state): State<AppState>,
    viewer: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = accounts::fetch_user(&conn, &id)?;
    let profile = accounts::serialize_user_detail(&conn, &user, &viewer)?;

    // The profile itself stays visible when blocked; only the posts are hidden
    let hidden = visibility::hidden_set(&conn, &viewer.id)?;
    let posts_hidden = hidden.contains(&user.id);
    let posts = if posts_hidden {
        Vec::new()
    } else {
        feed::visible_posts(
            &conn,
            &viewer.id,
            viewer.role.is_admin(),
            &hidden,
            Some(&user.id),
            None,
        )?
    };

    Ok(Html(ProfileTemplate {
        username: viewer.username,
        profile,
        posts,
        posts_hidden,
    })
    .into_response())
}
