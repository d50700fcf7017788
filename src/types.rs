// Application error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Rendering error: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::InvalidRequest(e.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::InvalidRequest(e.body_text())
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Storage(e) => match e {
                StorageError::InvalidExpiry(_)
                | StorageError::InvalidKey(_)
                | StorageError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
                StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
                StorageError::AccessDenied(_) | StorageError::Expired(_) => StatusCode::FORBIDDEN,
                StorageError::Provider(_) | StorageError::Credentials(_) => StatusCode::BAD_GATEWAY,
                StorageError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Render(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            AppError::Storage(_) => "Storage request failed",
            AppError::NotFound(_) => "Not found",
            AppError::InvalidRequest(_) => "Invalid request",
            AppError::PayloadTooLarge(_) => "Upload too large",
            AppError::Render(_) => "Failed to render page",
            AppError::Internal(_) => "Internal error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, "{}", self);
        } else {
            warn!(status = %status, "{}", self);
        }

        (
            status,
            Json(serde_json::json!({
                "error": self.summary(),
                "details": self.to_string()
            })),
        )
            .into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
