use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Database unavailable: {0}")]
    StoreUnavailable(#[from] r2d2::Error),

    #[error("Access key not found")]
    KeyNotFound,

    #[error("Access key expired")]
    KeyExpired { key_id: i64 },

    #[error("Access key quota exhausted")]
    QuotaExhausted { key_id: i64 },

    #[error("Unknown access key id {0}")]
    UnknownKey(i64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    Internal,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ApiError {
    /// True for the validation outcomes that mean "this key may not be used".
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::KeyNotFound | ApiError::KeyExpired { .. } | ApiError::QuotaExhausted { .. }
        )
    }

    /// The key a rejection was resolved to, if the lookup got that far.
    pub fn key_id(&self) -> Option<i64> {
        match self {
            ApiError::KeyExpired { key_id } | ApiError::QuotaExhausted { key_id } => Some(*key_id),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::KeyNotFound
            | ApiError::KeyExpired { .. }
            | ApiError::QuotaExhausted { .. }
            | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UnknownKey(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) | ApiError::Internal | ApiError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Callers never learn why a key was refused, only that it was.
        let body = if self.is_rejection() {
            json!({ "valid": false, "error": "Invalid access key" })
        } else {
            match &self {
                ApiError::UnknownKey(_) | ApiError::InvalidRequest(_) | ApiError::Unauthorized => {
                    json!({ "error": self.to_string() })
                }
                _ => {
                    tracing::error!(error = %self, "request failed");
                    json!({ "error": "Service unavailable" })
                }
            }
        };

        (status, Json(body)).into_response()
    }
}
