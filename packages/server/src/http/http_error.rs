//! HTTP error handling
//!
//! Every handler fails with `HttpError`, a short structured body whose
//! `code` selects the status line.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chanfs_core::FsError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpError {
    /// User-facing error message
    pub message: String,
    /// Machine-readable error code
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HttpError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(
        message: impl Into<String>,
        code: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: Some(details.into()),
        }
    }

    pub fn from_anyhow(err: anyhow::Error, code: impl Into<String>) -> Self {
        Self {
            message: err.to_string(),
            code: code.into(),
            details: Some(format!("{:?}", err)),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(message, "INVALID_INPUT")
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" | "TRANSPORT_MISMATCH" => StatusCode::CONFLICT,
            "INVALID_INPUT" | "VALIDATION_ERROR" => StatusCode::UNPROCESSABLE_ENTITY,
            "RANGE_NOT_SATISFIABLE" => StatusCode::RANGE_NOT_SATISFIABLE,
            "TRANSPORT_UNAVAILABLE" => StatusCode::BAD_GATEWAY,
            "ABORTED" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<FsError> for HttpError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(what) => HttpError::new(format!("Not found: {}", what), "NOT_FOUND"),
            FsError::Conflict(msg) => HttpError::new(msg, "CONFLICT"),
            FsError::Validation(msg) => HttpError::new(msg, "VALIDATION_ERROR"),
            FsError::TransportMismatch {
                message_id,
                expected,
                actual,
            } => HttpError::with_details(
                format!("Message {} no longer holds the recorded blob", message_id),
                "TRANSPORT_MISMATCH",
                format!("expected: {}, actual: {}", expected, actual),
            ),
            FsError::TransportUnavailable(msg) => HttpError::new(msg, "TRANSPORT_UNAVAILABLE"),
            FsError::Aborted => HttpError::new("Operation aborted", "ABORTED"),
            FsError::Store(e) => HttpError::from_anyhow(e, "STORE_ERROR"),
            FsError::Io(e) => HttpError::new(e.to_string(), "IO_ERROR"),
        }
    }
}
