//! HTTP error responses for the generator API.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use checkgate_core::{StoreError, ValidationError};

/// One offending field in a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub loc: Vec<String>,
    pub msg: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        status: StatusCode,
        message: String,
        detail: Vec<ErrorDetail>,
    },

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to query CI status: {0:#}")]
    Upstream(anyhow::Error),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let mut loc = vec!["body".to_string()];
        loc.extend(err.location);
        ApiError::Validation {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "invalid request".to_string(),
            detail: vec![ErrorDetail {
                loc,
                msg: err.message,
            }],
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation {
            status: rejection.status(),
            message: "invalid request body".to_string(),
            detail: vec![ErrorDetail {
                loc: vec!["body".to_string()],
                msg: rejection.body_text(),
            }],
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { status, .. } => *status,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = match &self {
            ApiError::Validation {
                message, detail, ..
            } => json!({ "error": message, "detail": detail }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
