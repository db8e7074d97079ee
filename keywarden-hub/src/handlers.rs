//! Registration handler: first validation layer of the pipeline.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keywarden_core::api::{ApiResponse, RegisterRequest};
use keywarden_core::crypto::hash_email;
use keywarden_core::metrics::MetricsAggregator;
use keywarden_core::upstream::UpstreamClient;
use keywarden_core::validation::validate_request;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<MetricsAggregator>,
    pub upstream: Arc<UpstreamClient>,
}

/// `POST /api/register`
///
/// Validates the submission, then forwards it verbatim to the
/// security-switch over mTLS and relays the structured reply. The plaintext
/// email never reaches a log line; a SHA-256 fingerprint is derived purely
/// for correlation.
pub async fn register(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            state.aggregator.increment_registration(false);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::failure("Invalid JSON payload.")),
            )
                .into_response();
        }
    };

    if let Err(reason) = validate_request(&request) {
        state.aggregator.increment_validation_failure(reason);
        state.aggregator.increment_registration(false);
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure(reason.message())),
        )
            .into_response();
    }

    let email_hash = hash_email(&request.email);
    info!(email_hash = %&email_hash[..16], "forwarding registration to security-switch");

    match state.upstream.forward(&request).await {
        Ok(reply) => {
            let succeeded = reply.status == StatusCode::CREATED && reply.body.success;
            state.aggregator.increment_registration(succeeded);
            if succeeded {
                info!(email_hash = %&email_hash[..16], "registration completed");
            } else {
                warn!(email_hash = %&email_hash[..16], status = %reply.status,
                    "registration rejected upstream");
            }
            (reply.status, Json(reply.body)).into_response()
        }
        Err(err) => {
            state.aggregator.increment_error(err.metric_label());
            state.aggregator.increment_registration(false);
            warn!(email_hash = %&email_hash[..16], kind = %err,
                "registration failed before reaching the switch");
            err.into_response()
        }
    }
}

/// `GET /api/health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": keywarden_core::service_names::ENTRY_HUB,
        "timestamp": unix_now(),
    }))
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
