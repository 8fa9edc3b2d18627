use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docportal_core::{IndexError, IngestError, PortalError};
use serde_json::json;
use std::fmt::Display;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    /// Classifies a core error raised while running `operation`.
    pub fn from_portal(operation: &str, error: impl Into<PortalError>) -> Self {
        let error = error.into();
        match &error {
            PortalError::Ingest(
                IngestError::InvalidArgument(_)
                | IngestError::InvalidChunkConfig(_)
                | IngestError::UnsupportedFile(_)
                | IngestError::MissingFileName(_),
            ) => Self::BadRequest(error.to_string()),
            PortalError::Index(IndexError::DirectoryNotFound(_)) => {
                Self::NotFound(error.to_string())
            }
            _ => Self::failed(operation, error),
        }
    }

    pub fn failed(operation: &str, error: impl Display) -> Self {
        error!(operation, %error, "request failed");
        Self::Internal(format!("{operation} failed: {error}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
