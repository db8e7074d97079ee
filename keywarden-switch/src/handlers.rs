//! Registration relay: second validation layer of the pipeline.
//!
//! The switch does not trust the hub's parsing. It re-reads the raw body,
//! re-parses the JSON, and re-runs the full validation ladder before
//! anything is forwarded to the vault.

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

/// `POST /api/register` (mTLS, peer organization `Hub` enforced upstream of
/// this handler).
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
        warn!(reason = %reason, "rejected request that passed the entry hub");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::failure(reason.message())),
        )
            .into_response();
    }

    let email_hash = hash_email(&request.email);

    match state.upstream.forward(&request).await {
        Ok(reply) => {
            let succeeded = reply.status == StatusCode::CREATED && reply.body.success;
            state.aggregator.increment_registration(succeeded);
            if succeeded {
                info!(email_hash = %&email_hash[..16], "vault stored credentials");
            }
            (reply.status, Json(reply.body)).into_response()
        }
        Err(err) => {
            state.aggregator.increment_error(err.metric_label());
            state.aggregator.increment_registration(false);
            warn!(email_hash = %&email_hash[..16], kind = %err, "vault unreachable");
            err.into_response()
        }
    }
}

/// `GET /api/health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": keywarden_core::service_names::SECURITY_SWITCH,
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::post;
    use axum::{Extension, Router};
    use keywarden_core::server::{require_peer_org, ConnectionPeer, OrgPolicy};
    use keywarden_core::tls::PeerIdentity;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        let upstream =
            UpstreamClient::new(tls, "https://127.0.0.1:1/api/store-user".to_string()).unwrap();
        AppState {
            aggregator: Arc::new(MetricsAggregator::new("security-switch")),
            upstream: Arc::new(upstream),
        }
    }

    fn app_with_peer(org: Option<&str>) -> Router {
        let peer = ConnectionPeer(org.map(|org| PeerIdentity {
            common_name: "entry-hub".to_string(),
            organization: org.to_string(),
            serial: "0a:0b".to_string(),
        }));
        Router::new()
            .route("/api/register", post(register))
            .with_state(test_state())
            .layer(axum::middleware::from_fn_with_state(
                OrgPolicy::new("Hub"),
                require_peer_org,
            ))
            .layer(Extension(peer))
    }

    const VALID_BODY: &str = r#"{"email":"alice@example.com","password":"MyStrongPass123@","ssh_public_key":"ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFzteWd1NdP+V10PkFmXfZ3rq7igAszd6adYDZ3dUjBO"}"#;

    #[tokio::test]
    async fn wrong_peer_organization_is_rejected_before_the_body_is_read() {
        let response = app_with_peer(Some("Other"))
            .oneshot(
                axum::http::Request::post("/api/register")
                    .header("content-type", "application/json")
                    .body(Body::from(VALID_BODY))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_certificate_is_401() {
        let response = app_with_peer(None)
            .oneshot(
                axum::http::Request::post("/api/register")
                    .body(Body::from(VALID_BODY))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authorized_peer_gets_revalidated_body() {
        // Valid peer but an invalid payload: the switch's own validation
        // layer must catch it even though the hub supposedly already did.
        let response = app_with_peer(Some("Hub"))
            .oneshot(
                axum::http::Request::post("/api/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"email":"bad","password":"MyStrongPass123@","ssh_public_key":"ssh-ed25519 AAAA"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
