use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Permission denied")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(BTreeMap<String, String>),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Single-field validation error, rendered as `{"field": "message"}`.
    pub fn field(field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.to_string());
        AppError::Validation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "Not found"}),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "Authentication required"}),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({"error": "Permission denied"}),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
            AppError::Validation(errors) => (StatusCode::BAD_REQUEST, json!(errors)),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}),
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}),
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn response_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(response_status(AppError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_returns_401() {
        assert_eq!(
            response_status(AppError::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn forbidden_returns_403() {
        assert_eq!(response_status(AppError::Forbidden), StatusCode::FORBIDDEN);
    }

    #[test]
    fn bad_request_returns_400() {
        assert_eq!(
            response_status(AppError::BadRequest("oops".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn field_validation_returns_400() {
        assert_eq!(
            response_status(AppError::field("username", "already taken")),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_returns_500() {
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
