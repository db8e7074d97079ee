//! Wire types shared by all three registration layers.

use serde::{Deserialize, Serialize};

/// A registration submission. Lives for the duration of one request and is
/// never persisted or logged in plaintext.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub ssh_public_key: String,
}

// Deliberately no Debug derive: a stray `{:?}` must not leak credentials.
impl std::fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &"<redacted>")
            .field("password", &"<redacted>")
            .field("ssh_public_key", &"<redacted>")
            .finish()
    }
}

/// Uniform response body for every registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Caller-facing message for a completed registration.
pub const REGISTRATION_SUCCESS: &str = "User successfully registered!";
/// Caller-facing message for a duplicate email hash.
pub const DUPLICATE_EMAIL: &str = "Email address already registered.";
/// Caller-facing message for a duplicate SSH key.
pub const DUPLICATE_SSH_KEY: &str = "SSH public key already in use.";
