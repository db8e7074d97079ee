//! Keywarden Core Library
//!
//! Shared building blocks for the Keywarden registration pipeline and its
//! metrics plane:
//! - the defense-in-depth input validator run identically by every layer
//! - field-level crypto (email fingerprinting, AES-256-GCM email encryption,
//!   Argon2id password hashing)
//! - the in-process metrics aggregator and MQTT publisher
//! - mTLS plumbing (organization-pinned clients and servers)

pub mod api;
pub mod crypto;
pub mod metrics;
pub mod server;
pub mod tls;
pub mod upstream;
pub mod validation;

pub use api::{ApiResponse, RegisterRequest};
pub use crypto::{
    decrypt_email, encrypt_email, hash_email, hash_password, verify_email_hash, CryptoError,
    EncryptedEmail, MasterKey, PasswordHash, PasswordHashParams,
};
pub use metrics::{Metric, MetricType, MetricsAggregator};
pub use validation::{validate_request, ValidationFailure};

/// Service identifiers as they appear on the metrics bus and in topic ACLs.
pub mod service_names {
    pub const ENTRY_HUB: &str = "entry-hub";
    pub const SECURITY_SWITCH: &str = "security-switch";
    pub const DATABASE_VAULT: &str = "database-vault";
    pub const METRICS_COLLECTOR: &str = "metrics-collector";
}
