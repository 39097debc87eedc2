//! HTTP mapping for transport-level errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::Error;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl Error {
    fn error_type(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionBusy(_) => "session_busy",
            Self::TooManySessions(_) => "too_many_sessions",
            Self::BadRequest(_) | Self::Json(_) => "bad_request",
            _ => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::SessionBusy(_) | Self::TooManySessions(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }

        let body = ErrorBody {
            error: self.error_type(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
