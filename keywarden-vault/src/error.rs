//! Vault error surface.
//!
//! Internal detail is logged where it happens; what leaves the service is a
//! category, a status code, and a sanitised message.

use crate::storage::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keywarden_core::api::{ApiResponse, DUPLICATE_EMAIL, DUPLICATE_SSH_KEY};
use keywarden_core::crypto::CryptoError;
use keywarden_core::validation::ValidationFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid JSON payload")]
    InvalidJson,

    #[error("validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("internal error")]
    Internal,
}

impl IntoResponse for VaultError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidJson => (StatusCode::BAD_REQUEST, "Invalid JSON payload.".to_string()),
            Self::Validation(reason) => (StatusCode::BAD_REQUEST, reason.message().to_string()),
            Self::Crypto(CryptoError::InvalidMasterKey(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Encryption configuration error.".to_string(),
            ),
            Self::Crypto(CryptoError::KdfFailed(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password processing error.".to_string(),
            ),
            Self::Crypto(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Email encryption failed.".to_string(),
            ),
            Self::Storage(StorageError::EmailHashExists) => {
                (StatusCode::CONFLICT, DUPLICATE_EMAIL.to_string())
            }
            Self::Storage(StorageError::SshKeyExists) => {
                (StatusCode::CONFLICT, DUPLICATE_SSH_KEY.to_string())
            }
            Self::Storage(StorageError::Unavailable) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Database service unavailable.".to_string(),
            ),
            Self::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage operation failed.".to_string(),
            ),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to store user credentials.".to_string(),
            ),
        };
        (status, Json(ApiResponse::failure(message))).into_response()
    }
}
