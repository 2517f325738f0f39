use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::validation::ValidationError;

/// Centralized error type at the HTTP handler boundary.
///
/// Subprocess failures are collapsed into [`AppError::MetadataUnavailable`] or
/// [`AppError::DownloadFailed`] before they get here; the diagnostic detail is
/// logged where it happens and never reaches the client.
///
/// # Example
///
/// ```no_run
/// use mediagate::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid URL, unsupported host or bad format identifier
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Required request field absent or empty
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Body is not the JSON object the endpoint expects
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// yt-dlp metadata dump failed, timed out or produced unusable output
    #[error("Metadata unavailable")]
    MetadataUnavailable,

    /// yt-dlp could not be started for a download
    #[error("Download failed")]
    DownloadFailed,

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MissingField(_) | AppError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::MetadataUnavailable | AppError::DownloadFailed => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client.
    ///
    /// Input errors echo what was wrong with the input; everything upstream
    /// collapses to one generic message per endpoint category.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Validation(ValidationError::InvalidUrl(_)) => "Invalid URL".to_string(),
            AppError::Validation(ValidationError::UnsupportedHost(host)) => {
                format!("Unsupported platform: {}", host)
            }
            AppError::Validation(ValidationError::InvalidFormatId(_)) => "Invalid format_id".to_string(),
            AppError::MissingField(field) => format!("{} is required", field),
            AppError::InvalidBody(_) => "Invalid request body".to_string(),
            AppError::MetadataUnavailable => "Failed to fetch information".to_string(),
            AppError::DownloadFailed => "Download failed".to_string(),
            AppError::Config(_) | AppError::Io(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Rejected request");
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}
