//! Crate-wide error type.
//!
//! Every fallible operation in the store, logic and API layers returns
//! [`Result`]. The taxonomy variants map one-to-one onto client-visible HTTP
//! errors; `CycleDetected`, `Database` and `Internal` are server faults whose
//! detail is logged and never sent to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::model::Id;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// Absent and cross-tenant rows are reported the same way.
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid JSON filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Too many items: at most {max} per request, got {got}")]
    TooManyItems { max: usize, got: usize },

    #[error("No fields to update")]
    NoFields,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Parent cycle detected at item {0}")]
    CycleDetected(Id),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidFilter(_)
            | Error::InvalidItem(_)
            | Error::TooManyItems { .. }
            | Error::NoFields
            | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::CycleDetected(_) | Error::Database(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn is_server_fault(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if self.is_server_fault() {
            log::error!("Request failed: {:#}", self);
            ErrorResponse::new("Internal server error")
        } else {
            ErrorResponse::new(&self.to_string())
        };
        (status, Json(body)).into_response()
    }
}
