use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use rusqlite::params;

use crate::db::models::Role;
use crate::error::AppError;
use crate::state::AppState;

/// The authenticated viewer, threaded explicitly into every query and
/// permission check.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub role: Role,
}

/// Extractor that requires authentication. Accepts the API token either as
/// `Authorization: Bearer <token>` (or the legacy `Token <token>` scheme) or as the
/// session cookie set by the HTML login page. Returns 401 otherwise.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .or_else(|| cookie_token(&parts.headers, &state.config.auth.cookie_name))
            .ok_or(AppError::Unauthorized)?;

        let conn = state.db.get()?;
        conn.query_row(
            "SELECT u.id, u.username, u.role FROM auth_tokens t \
             JOIN users u ON u.id = t.user_id \
             WHERE t.token = ?1",
            params![token],
            |row| {
                Ok(CurrentUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    role: Role::parse(&row.get::<_, String>(2)?),
                })
            },
        )
        .map_err(|_| AppError::Unauthorized)
    }
}

/// Optional viewer — returns None instead of 401 when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(_) => Ok(MaybeUser(None)),
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("Token "))?;
    Some(token.trim().to_string())
}

/// Pull the session token out of the request cookies. Also used by the HTML
/// logout handler to know which token to revoke.
pub fn cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == cookie_name {
                Some(val.to_string())
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    #[test]
    fn bearer_token_is_extracted() {
        let headers = headers_with(header::AUTHORIZATION, "Bearer abc123");
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn legacy_token_prefix_is_accepted() {
        let headers = headers_with(header::AUTHORIZATION, "Token abc123");
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let headers = headers_with(header::AUTHORIZATION, "Basic abc123");
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn session_cookie_is_extracted() {
        let headers = headers_with(
            header::COOKIE,
            "other=1; midya_session=deadbeef; theme=dark",
        );
        assert_eq!(
            cookie_token(&headers, "midya_session").as_deref(),
            Some("deadbeef")
        );
    }

    #[test]
    fn missing_cookie_returns_none() {
        let headers = headers_with(header::COOKIE, "other=1");
        assert_eq!(cookie_token(&headers, "midya_session"), None);
    }
}
