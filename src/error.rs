use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failures while turning an image string into a digest-qualified reference.
///
/// Everything except [`ResolveError::Http`] is a rejection of the submitted
/// object and ends up as the message of a deny admission response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{0}")]
    InvalidReference(String),

    #[error("Unknown Docker registry: {0}")]
    UnknownRegistry(String),

    #[error("{0}")]
    Authentication(String),

    #[error("Unknown image {0}")]
    UnknownImage(String),

    #[error("{0}")]
    DigestNotFound(String),

    #[error("{0}")]
    MalformedResponse(String),

    #[error("Registry request failed: {0}")]
    Http(String),
}

impl ResolveError {
    pub fn is_rejection(&self) -> bool {
        !matches!(self, ResolveError::Http(_))
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        ResolveError::Http(err.to_string())
    }
}

/// Failures of the admission endpoint that are answered with an HTTP error
/// instead of an admission decision.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid AdmissionReview: {0}")]
    InvalidReview(String),

    #[error("Admission request body is too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Resolve(ResolveError),

    #[error("Failed to forward admission request upstream: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            WebhookError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            WebhookError::Resolve(_) | WebhookError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<JsonRejection> for WebhookError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => WebhookError::PayloadTooLarge(rejection.body_text()),
            _ => WebhookError::InvalidReview(rejection.body_text()),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Admission request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
