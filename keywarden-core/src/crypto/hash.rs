//! SHA-256 email fingerprinting.
//!
//! The hex-encoded fingerprint doubles as the primary key of the credentials
//! table and as the only admissible identifier in log output: services log
//! the fingerprint, never the address.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex-encoded SHA-256 fingerprint of an email address.
pub fn hash_email(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    hex::encode(digest)
}

/// Check a plaintext email against an expected fingerprint in constant time.
pub fn verify_email_hash(email: &str, expected_hash: &str) -> bool {
    let actual = hash_email(email);
    actual.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            hash_email("alice@example.com"),
            hash_email("alice@example.com")
        );
    }

    #[test]
    fn hash_matches_known_vector() {
        // SHA-256("alice@example.com")
        assert_eq!(
            hash_email("alice@example.com"),
            "ff8d9819fc0e12bf0d24892e45987e249a28dce836a85cad60e28eaaa8c6d976"
        );
    }

    #[test]
    fn hash_is_lowercase_hex_64() {
        let h = hash_email("bob@example.com");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_accepts_matching_email() {
        let h = hash_email("carol@example.com");
        assert!(verify_email_hash("carol@example.com", &h));
        assert!(!verify_email_hash("mallory@example.com", &h));
    }
}
