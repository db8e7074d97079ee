//! Credential storage handler: final validation layer and the only writer
//! of the credentials table.

use crate::error::VaultError;
use crate::storage::{NewUser, UserStore};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keywarden_core::api::{ApiResponse, RegisterRequest, REGISTRATION_SUCCESS};
use keywarden_core::crypto::{encrypt_email, hash_email, hash_password, MasterKey, PasswordHashParams};
use keywarden_core::metrics::MetricsAggregator;
use keywarden_core::validation::validate_request;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<MetricsAggregator>,
    pub store: Arc<UserStore>,
    pub master_key: Arc<MasterKey>,
    pub password_params: PasswordHashParams,
}

/// `POST /api/store-user` (mTLS, peer organization `Switch` enforced
/// upstream of this handler).
///
/// Ordered steps; any failure short-circuits with a categorised error and
/// no partial write:
/// 1. re-validate the submission
/// 2. derive the email fingerprint
/// 3. encrypt the email under a fresh salt and nonce
/// 4. advisory duplicate pre-check (fails early, before the expensive hash)
/// 5. Argon2id the password on the blocking pool
/// 6. transactional uniqueness check + insert, unique indexes authoritative
pub async fn store_user(State(state): State<AppState>, body: Bytes) -> Response {
    match store_user_inner(&state, &body).await {
        Ok(response) => {
            state.aggregator.increment_registration(true);
            response
        }
        Err(err) => {
            state.aggregator.increment_registration(false);
            if let VaultError::Validation(reason) = &err {
                state.aggregator.increment_validation_failure(*reason);
            } else {
                state.aggregator.increment_error(&err.to_string());
            }
            err.into_response()
        }
    }
}

async fn store_user_inner(state: &AppState, body: &[u8]) -> Result<Response, VaultError> {
    let request: RegisterRequest =
        serde_json::from_slice(body).map_err(|_| VaultError::InvalidJson)?;

    validate_request(&request).map_err(VaultError::Validation)?;

    let email_hash = hash_email(&request.email);
    let encrypted = encrypt_email(&state.master_key, &request.email)?;

    state
        .store
        .ensure_available(&email_hash, &request.ssh_public_key)
        .await?;

    // Argon2id allocates tens of MiB and burns CPU for tens of
    // milliseconds; it runs on the blocking pool so it cannot stall other
    // requests on this worker, and the allocation is returned when the
    // closure's frame drops.
    let params = state.password_params;
    let password = request.password.clone();
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password, &params))
        .await
        .map_err(|_| VaultError::Internal)??;

    state
        .store
        .store_user(NewUser {
            email_hash: email_hash.clone(),
            encrypted_email: encrypted.ciphertext_b64,
            email_salt: encrypted.salt_hex,
            password_hash: hashed.hash_hex,
            password_salt: hashed.salt_hex,
            ssh_public_key: request.ssh_public_key,
        })
        .await?;

    info!(email_hash = %&email_hash[..16], "audit: user registration completed");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(REGISTRATION_SUCCESS)),
    )
        .into_response())
}

/// `GET /api/stats` -- anonymous usage statistics for operators.
pub async fn stats(State(state): State<AppState>) -> Result<Response, VaultError> {
    let stats = state.store.user_stats().await?;
    Ok(Json(serde_json::json!({
        "service": keywarden_core::service_names::DATABASE_VAULT,
        "timestamp": chrono::Utc::now().timestamp(),
        "statistics": stats,
    }))
    .into_response())
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Response {
    let database = state.store.health_check().await;
    let status = if database.is_ok() { "healthy" } else { "degraded" };
    let body = serde_json::json!({
        "status": status,
        "service": keywarden_core::service_names::DATABASE_VAULT,
        "timestamp": chrono::Utc::now().timestamp(),
        "checks": {
            "database": if database.is_ok() { "healthy" } else { "unavailable" },
        },
    });
    let code = if database.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}
