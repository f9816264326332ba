//! Response envelope and error formatting
//!
//! Every API response shares the `{ success, data?, message?, error? }`
//! envelope, with HTTP status codes and machine-readable error codes.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error body placed under the envelope's `error` key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

/// Standardized response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope<serde_json::Value> {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(ErrorBody {
                code: error.error_code(),
                message: error.user_message(),
            }),
        }
    }
}

/// Build a `200 OK` success envelope around serializable data
pub fn success_response<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }),
    )
        .into_response()
}

/// Build a `201 Created` success envelope around serializable data
pub fn created_response<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(Envelope {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }),
    )
        .into_response()
}

/// Build a success envelope carrying only a message
pub fn message_response(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(Envelope::<serde_json::Value> {
            success: true,
            data: None,
            message: Some(message.into()),
            error: None,
        }),
    )
        .into_response()
}

/// Convert errors into enveloped HTTP responses with proper status codes.
///
/// Server errors log full detail and surface only the generic user message;
/// client errors log at `warn`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let body = Envelope::from_app_error(&self);
        (status_code, Json(body)).into_response()
    }
}
