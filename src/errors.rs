use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// HTTP-layer error types.
///
/// Extraction failures are not represented here: they are part of the normal
/// lookup response contract (`success: false`).
#[derive(Debug, Clone)]
pub enum AppError {
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid or missing JSON body).
    BadRequest(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each variant to a status code and the `{success, message}` body.
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => {
                tracing::debug!("Rejected request body: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Failures reported by a browser automation backend.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// Failures at the extraction boundary. Never cached, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("no browser slot became free within {0:?}")]
    PoolSaturated(Duration),
    #[error("could not start browser: {0}")]
    Launch(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("results panel did not render within {0:?}")]
    ResultsNotRendered(Duration),
    #[error("{0}")]
    Scrape(String),
}

impl From<BrowserError> for ExtractionError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Launch(msg) => ExtractionError::Launch(msg),
            BrowserError::Timeout { what, after } => ExtractionError::Timeout { what, after },
            BrowserError::Navigation(msg) => ExtractionError::Navigation(msg),
            other => ExtractionError::Scrape(other.to_string()),
        }
    }
}

impl ExtractionError {
    /// Message returned to HTTP clients.
    pub fn client_message(&self) -> String {
        format!("Error en Scraper: {}", self)
    }
}
