use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid credentials")]
    Unauthorized,
    #[error("{resource} not found")]
    NotFound { resource: &'static str, id: String },
    #[error("Player not connected")]
    NotConnected(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Storage unavailable: {0}")]
    Storage(String),
}

impl AppError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } | Self::NotConnected(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Storage(detail) => {
                tracing::error!("Storage error: {}", detail);
                "Storage unavailable".to_string()
            }
            other => other.to_string(),
        };
        let body = serde_json::json!({ "error": message });
        (self.as_status_code(), Json(body)).into_response()
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for AppError {
    fn from(value: diesel::r2d2::PoolError) -> Self {
        Self::Storage(format!("connection pool: {}", value))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Storage(format!("corrupt record: {}", value))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Storage(format!("storage task failed: {}", value))
    }
}
