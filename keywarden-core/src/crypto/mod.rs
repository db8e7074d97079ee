//! Field-level cryptography for the vault.
//!
//! This module provides:
//! - master key loading and validation
//! - SHA-256 email fingerprinting
//! - AES-256-GCM email encryption with per-record derived keys
//! - Argon2id password hashing

pub mod cipher;
pub mod hash;
pub mod kdf;
pub mod keys;

pub use cipher::{decrypt_email, encrypt_email, EncryptedEmail};
pub use hash::{hash_email, verify_email_hash};
pub use kdf::{hash_password, PasswordHash, PasswordHashParams};
pub use keys::MasterKey;

use thiserror::Error;

/// Errors from cryptographic operations.
///
/// Variants never embed plaintext inputs; the strings carry library
/// diagnostics only.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),

    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
