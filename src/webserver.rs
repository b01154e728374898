use crate::admission::{AdmissionReview, ensure_admission_review, request_uid, request_username};
use crate::error::WebhookError;
use crate::state::AppState;
use crate::upstream::Forwarded;
use crate::whitelist::{MAX_BODY_BYTES, whitelist_stage};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{CONTENT_TYPE, SERVER};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tracing::debug;

pub const SERVER_NAME: &str = "tag-resolver-proxy";

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Pins every container image of the request to a digest and forwards the
/// mutated request upstream. Rejected images turn into a local deny.
pub async fn admission_review(
    State(state): State<AppState>,
    uri: Uri,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, WebhookError> {
    let Json(mut payload) = payload?;
    ensure_admission_review(&payload)?;
    debug!(
        "Admission request {} from {}",
        request_uid(&payload),
        request_username(&payload)
    );

    if let Err(err) = state.registries.resolve_containers(&mut payload).await {
        if err.is_rejection() {
            return Ok(AdmissionReview::deny(&payload, &err.to_string()).into_response());
        }
        return Err(WebhookError::Resolve(err));
    }

    let response = state.upstream.forward(uri.path(), &payload).await?;
    Ok(response.into_response())
}

/// Identifies responses the proxy produced itself; forwarded responses pass untouched.
pub async fn tag_local_responses(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if response.extensions().get::<Forwarded>().is_none() {
        let headers = response.headers_mut();
        headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
    }
    response
}

pub fn create_app(state: AppState) -> Router {
    let admission = Router::new()
        .route("/", post(admission_review))
        .layer(middleware::from_fn_with_state(state.clone(), whitelist_stage))
        .layer(middleware::from_fn(tag_local_responses))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .merge(admission)
}
