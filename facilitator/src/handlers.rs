//! HTTP endpoints of the facilitator.
//!
//! Protocol-critical endpoints (`/verify`, `/settle`) plus discovery
//! (`/supported`, `/health`) and the admin bridge-status surface.
//!
//! Status mapping follows the protocol's propagation policy: expected
//! payment failures answer 200 with a structured envelope; only malformed
//! bodies are 400 and infrastructure faults 500.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use railbridge_bridge::store::BridgeJobStore;
use railbridge_bridge::worker::{BridgeWorker, CancelError};
use railbridge_types::facilitator::Facilitator;
use railbridge_types::proto;
use railbridge_types::timestamp::UnixTimestamp;

use crate::facilitator_local::{FacilitatorError, FacilitatorLocal};

/// Shared state behind the HTTP surface.
pub struct AppState {
    pub facilitator: FacilitatorLocal,
    pub store: Arc<dyn BridgeJobStore>,
    pub worker: Arc<BridgeWorker>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .route("/health", get(get_health))
        .route("/bridge-status/{id}", get(get_bridge_status))
        .route("/bridge-status/{id}/cancel", post(post_bridge_cancel))
}

/// `GET /`: a simple greeting from the facilitator.
#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `POST /verify`: facilitator-side verification of a proposed payment.
#[instrument(skip_all)]
async fn post_verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<proto::RawVerifyRequest>,
) -> Response {
    match state.facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `POST /settle`: facilitator-side execution of a valid payment on-chain.
#[instrument(skip_all)]
async fn post_settle(
    State(state): State<Arc<AppState>>,
    Json(body): Json<proto::RawSettleRequest>,
) -> Response {
    match state.facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `GET /supported`: payment kinds, extensions, and signers on offer.
#[instrument(skip_all)]
async fn get_supported(State(state): State<Arc<AppState>>) -> Response {
    match state.facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `GET /health`: liveness signal.
#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": UnixTimestamp::now(),
        "facilitator": env!("CARGO_PKG_NAME"),
    }))
}

/// `GET /bridge-status/{id}`: the current bridge job record.
#[instrument(skip_all, fields(job_id = %id))]
async fn get_bridge_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_by_id(&id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("bridge job {id} not found") })),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "bridge status lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

/// `POST /bridge-status/{id}/cancel`: admin cancellation of a pending job.
#[instrument(skip_all, fields(job_id = %id))]
async fn post_bridge_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.worker.cancel(&id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(CancelError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("bridge job {id} not found") })),
        )
            .into_response(),
        Err(CancelError::NotCancellable(status)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("bridge job in state {status} cannot be cancelled") })),
        )
            .into_response(),
        Err(CancelError::Store(error)) => {
            tracing::error!(error = %error, "bridge cancel failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

impl IntoResponse for FacilitatorError {
    fn into_response(self) -> Response {
        match self {
            FacilitatorError::InvalidRequest(detail) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": detail })),
            )
                .into_response(),
        }
    }
}
