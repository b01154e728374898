use crate::admission::{AdmissionReview, ensure_admission_review};
use crate::containers::containers;
use crate::error::WebhookError;
use crate::state::AppState;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{debug, warn};

pub const ALL_WHITELISTED: &str = "All images whitelisted";

/// Upper bound for admission request bodies, shared by every stage that buffers them
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Image prefixes that bypass tag resolution entirely.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    prefixes: Vec<String>,
}

impl Whitelist {
    pub fn new(prefixes: Vec<String>) -> Self {
        Whitelist { prefixes }
    }

    pub fn matching_prefix(&self, image: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .map(String::as_str)
            .find(|prefix| image.starts_with(prefix))
    }

    /// True only if the request has at least one container and every
    /// container image starts with a whitelisted prefix.
    pub fn all_whitelisted(&self, payload: &Value) -> bool {
        let mut all_whitelisted: Option<bool> = None;
        for container in containers(payload) {
            let image = container.get("image").and_then(Value::as_str);
            let whitelisted = match image.and_then(|image| self.matching_prefix(image)) {
                Some(prefix) => {
                    warn!(
                        "Image {} belongs to whitelisted repository {}",
                        image.unwrap_or_default(),
                        prefix
                    );
                    true
                }
                None => false,
            };
            all_whitelisted = Some(all_whitelisted.unwrap_or(true) && whitelisted);
        }
        all_whitelisted.unwrap_or(false)
    }
}

/// Answers requests whose images are all whitelisted without resolving or
/// forwarding anything. Other requests continue down the chain unchanged.
pub async fn whitelist_stage(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return WebhookError::PayloadTooLarge(e.to_string()).into_response(),
    };

    if let Ok(payload) = serde_json::from_slice::<Value>(&bytes) {
        if ensure_admission_review(&payload).is_ok() && state.whitelist.all_whitelisted(&payload) {
            return AdmissionReview::allow(&payload, ALL_WHITELISTED).into_response();
        }
    } else {
        debug!("Request body is not JSON, skipping whitelist check");
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
