//! Error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nasrelay_gateway::{ErrorKind, GatewayError};
use nasrelay_protocol::ErrorResponse;

/// A failed request: a per-endpoint headline plus the classified cause.
///
/// Validation failures answer 400 with the cause as `error`. Everything
/// else answers 500 with the headline as `error` and the cause as
/// `details`.
#[derive(Debug)]
pub struct ApiError {
    headline: &'static str,
    error: GatewayError,
}

impl ApiError {
    pub fn new(headline: &'static str, error: GatewayError) -> Self {
        Self { headline, error }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("Bad request", GatewayError::Validation(message.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let status =
            StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = self.error.to_string();

        let mut body = if kind == ErrorKind::Validation {
            tracing::warn!(kind = %kind, error = %message, "{}", self.headline);
            ErrorResponse::new(message)
        } else {
            tracing::error!(kind = %kind, error = %message, "{}", self.headline);
            ErrorResponse::new(self.headline).with_details(message)
        };

        if let GatewayError::UploadAborted { uploaded, .. } = self.error {
            body = body.with_files(uploaded);
        }

        (status, Json(body)).into_response()
    }
}
