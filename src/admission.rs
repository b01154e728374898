use crate::error::WebhookError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub const API_VERSION: &str = "admission.k8s.io/v1beta1";
pub const KIND: &str = "AdmissionReview";

/// A decision synthesised by the proxy itself rather than by the upstream webhook.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    pub status: Status,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Status {
    pub message: String,
}

impl AdmissionReview {
    pub fn allow(payload: &Value, message: &str) -> Self {
        warn!(
            "Allowing admission for {} in proxy: {}",
            request_username(payload),
            message
        );
        Self::decision(payload, true, message)
    }

    pub fn deny(payload: &Value, message: &str) -> Self {
        warn!(
            "Denying admission for {} in proxy: {}",
            request_username(payload),
            message
        );
        Self::decision(payload, false, message)
    }

    fn decision(payload: &Value, allowed: bool, message: &str) -> Self {
        AdmissionReview {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            response: AdmissionResponse {
                uid: request_uid(payload).to_string(),
                allowed,
                status: Status {
                    message: message.to_string(),
                },
            },
        }
    }
}

impl IntoResponse for AdmissionReview {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub fn request_uid(payload: &Value) -> &str {
    payload
        .pointer("/request/uid")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub fn request_username(payload: &Value) -> &str {
    payload
        .pointer("/request/userInfo/username")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

pub fn ensure_admission_review(payload: &Value) -> Result<(), WebhookError> {
    match payload.get("kind").and_then(Value::as_str) {
        Some(KIND) => Ok(()),
        Some(kind) => Err(WebhookError::InvalidReview(format!(
            "expected kind {}, got {}",
            KIND, kind
        ))),
        None => Err(WebhookError::InvalidReview("missing kind".to_string())),
    }
}
