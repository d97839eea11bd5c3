//! Error types for the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::geotag::GeotagError;
use crate::save::{DeleteError, SaveError, ValidationError};
use crate::store::StoreError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Save error: {0}")]
    Save(#[from] SaveError),

    #[error("Delete error: {0}")]
    Delete(#[from] DeleteError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Geotag error: {0}")]
    Geotag(#[from] GeotagError),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn store_status(e: &StoreError) -> (StatusCode, &'static str) {
    match e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::PreconditionFailed(_) => (StatusCode::CONFLICT, "concurrent_modification"),
        StoreError::Unauthorized(_) => (StatusCode::FORBIDDEN, "store_unauthorized"),
        StoreError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "store_timeout"),
        _ => (StatusCode::BAD_GATEWAY, "store_error"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string()),
            AppError::Save(e) => match e {
                SaveError::Validation(inner) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", inner.to_string())
                }
                SaveError::UnknownRelationship(_) => (StatusCode::NOT_FOUND, "not_found", e.to_string()),
                SaveError::Store { source, .. } => {
                    tracing::error!("Store error during save: {}", e);
                    let (status, kind) = store_status(source);
                    (status, kind, e.to_string())
                }
            },
            AppError::Delete(e) => match e {
                DeleteError::NotFound(_) | DeleteError::MissingPurpose { .. } => {
                    (StatusCode::NOT_FOUND, "not_found", e.to_string())
                }
                DeleteError::UnsupportedPurpose(_) => (StatusCode::BAD_REQUEST, "bad_request", e.to_string()),
                DeleteError::Store(source) => {
                    tracing::error!("Store error during delete: {}", source);
                    let (status, kind) = store_status(source);
                    (status, kind, source.to_string())
                }
            },
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                let (status, kind) = store_status(e);
                (status, kind, e.to_string())
            }
            AppError::Geotag(e) => match e {
                GeotagError::Superseded => (StatusCode::CONFLICT, "superseded", e.to_string()),
                GeotagError::MissingCoordinates(_) | GeotagError::InvalidCoordinates { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
                }
                GeotagError::Provider(_) => {
                    tracing::error!("Geotag provider error: {}", e);
                    (StatusCode::BAD_GATEWAY, "provider_error", e.to_string())
                }
            },
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
