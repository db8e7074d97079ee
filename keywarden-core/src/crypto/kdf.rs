//! Argon2id password hashing.
//!
//! Parameters are configuration, not constants: deployments tune memory,
//! iterations, and parallelism, and the defaults here sit deliberately below
//! the RFC 9106 recommendations so test suites stay fast.

use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const OUTPUT_LEN: usize = 32;

/// Tunable Argon2id parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PasswordHashParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of iterations.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for PasswordHashParams {
    fn default() -> Self {
        Self {
            memory_kib: 32 * 1024, // 32 MiB
            iterations: 1,
            parallelism: 4,
        }
    }
}

impl PasswordHashParams {
    /// Sanity-check the configured parameters.
    pub fn validate(&self) -> Result<()> {
        if self.memory_kib < 8 * 1024 {
            return Err(CryptoError::KdfFailed(
                "memory cost too low (minimum: 8 MiB)".to_string(),
            ));
        }
        if self.iterations < 1 {
            return Err(CryptoError::KdfFailed(
                "iteration count too low (minimum: 1)".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "parallelism too low (minimum: 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hex-encoded Argon2id output and its salt, ready for persistence.
#[derive(Debug, Clone)]
pub struct PasswordHash {
    /// Hex of the 32-byte Argon2id output.
    pub hash_hex: String,
    /// Hex of the 16-byte random salt.
    pub salt_hex: String,
}

/// Hash a password with a fresh random salt.
///
/// Allocates `memory_kib` KiB for the duration of the call; run it on a
/// blocking worker so it cannot stall async request handling.
pub fn hash_password(password: &str, params: &PasswordHashParams) -> Result<PasswordHash> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let hash_hex = hash_password_with_salt(password, &salt, params)?;
    Ok(PasswordHash {
        hash_hex,
        salt_hex: hex::encode(salt),
    })
}

/// Hash a password with a caller-provided salt (verification path).
pub fn hash_password_with_salt(
    password: &str,
    salt: &[u8],
    params: &PasswordHashParams,
) -> Result<String> {
    params.validate()?;

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(OUTPUT_LEN),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("invalid parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut output = Zeroizing::new([0u8; OUTPUT_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, output.as_mut())
        .map_err(|e| CryptoError::KdfFailed(format!("hashing failed: {e}")))?;

    Ok(hex::encode(output.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap parameters so the test suite does not chew 32 MiB per case.
    fn test_params() -> PasswordHashParams {
        PasswordHashParams {
            memory_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn default_params_validate() {
        let params = PasswordHashParams::default();
        assert_eq!(params.memory_kib, 32 * 1024);
        assert_eq!(params.iterations, 1);
        assert_eq!(params.parallelism, 4);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_params() {
        let mut params = test_params();
        params.memory_kib = 64;
        assert!(params.validate().is_err());

        let mut params = test_params();
        params.iterations = 0;
        assert!(params.validate().is_err());

        let mut params = test_params();
        params.parallelism = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn output_is_64_hex_chars() {
        let hashed = hash_password("MyStrongPass123@", &test_params()).unwrap();
        assert_eq!(hashed.hash_hex.len(), 64);
        assert_eq!(hashed.salt_hex.len(), 32);
    }

    #[test]
    fn same_salt_same_hash() {
        let salt = [7u8; SALT_LEN];
        let a = hash_password_with_salt("MyStrongPass123@", &salt, &test_params()).unwrap();
        let b = hash_password_with_salt("MyStrongPass123@", &salt, &test_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_salt_changes_hash() {
        let a = hash_password("MyStrongPass123@", &test_params()).unwrap();
        let b = hash_password("MyStrongPass123@", &test_params()).unwrap();
        assert_ne!(a.salt_hex, b.salt_hex);
        assert_ne!(a.hash_hex, b.hash_hex);
    }

    #[test]
    fn different_passwords_differ() {
        let salt = [9u8; SALT_LEN];
        let a = hash_password_with_salt("MyStrongPass123@", &salt, &test_params()).unwrap();
        let b = hash_password_with_salt("OtherPass456!", &salt, &test_params()).unwrap();
        assert_ne!(a, b);
    }
}
