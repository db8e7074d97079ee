//! AES-256-GCM email encryption with per-record derived keys.
//!
//! Each record gets a fresh 16-byte salt; the record key is derived as
//! HKDF-SHA256(master key, salt, context) and used exactly once with a fresh
//! 12-byte nonce. Stored layout is `base64(nonce || ciphertext || tag)` plus
//! the hex salt, so two registrations of the same address never produce the
//! same ciphertext.

use crate::crypto::{CryptoError, MasterKey, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Domain-separation context for email record keys. Versioned so a future
/// scheme change can coexist with old records.
const EMAIL_KEY_CONTEXT: &[u8] = b"email-encryption-secure-v1";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypted email as stored in the credentials table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEmail {
    /// `base64(nonce || ciphertext || tag)`
    pub ciphertext_b64: String,
    /// Hex-encoded key-derivation salt.
    pub salt_hex: String,
}

/// Derive the per-record AES key. The output lives in a [`Zeroizing`] buffer
/// so it is cleared when the caller's encrypt/decrypt frame returns.
fn derive_record_key(master: &MasterKey, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), master.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(EMAIL_KEY_CONTEXT, key.as_mut())
        .map_err(|e| CryptoError::KdfFailed(format!("HKDF expand: {e}")))?;
    Ok(key)
}

/// Encrypt an email address under a fresh salt and nonce.
///
/// # Security
/// - Random salt ensures a unique record key per registration
/// - Random nonce prevents deterministic ciphertexts
/// - GCM tag binds ciphertext integrity to the record key
pub fn encrypt_email(master: &MasterKey, email: &str) -> Result<EncryptedEmail> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = derive_record_key(master, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), email.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed("AES-GCM seal".to_string()))?;

    let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(&ciphertext);

    Ok(EncryptedEmail {
        ciphertext_b64: base64::engine::general_purpose::STANDARD.encode(&packed),
        salt_hex: hex::encode(salt),
    })
}

/// Decrypt a stored email using its salt.
///
/// A GCM authentication failure is a fatal integrity error, reported as
/// [`CryptoError::AuthenticationFailed`]. Callers on the administrative path
/// are expected to audit-log every invocation.
pub fn decrypt_email(master: &MasterKey, ciphertext_b64: &str, salt_hex: &str) -> Result<String> {
    let salt = hex::decode(salt_hex)
        .map_err(|e| CryptoError::InvalidEncoding(format!("salt hex: {e}")))?;
    let key = derive_record_key(master, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

    let packed = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| CryptoError::InvalidEncoding(format!("ciphertext base64: {e}")))?;
    if packed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidEncoding(format!(
            "ciphertext too short: {} bytes",
            packed.len()
        )));
    }

    let (nonce, ciphertext) = packed.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn master() -> MasterKey {
        MasterKey::from_bytes(rand::random()).unwrap()
    }

    #[test]
    fn roundtrip() {
        let key = master();
        let enc = encrypt_email(&key, "alice@example.com").unwrap();
        let dec = decrypt_email(&key, &enc.ciphertext_b64, &enc.salt_hex).unwrap();
        assert_eq!(dec, "alice@example.com");
    }

    #[test]
    fn same_email_encrypts_differently() {
        let key = master();
        let a = encrypt_email(&key, "alice@example.com").unwrap();
        let b = encrypt_email(&key, "alice@example.com").unwrap();
        assert_ne!(a.ciphertext_b64, b.ciphertext_b64);
        assert_ne!(a.salt_hex, b.salt_hex);
    }

    #[test]
    fn stored_fields_match_schema_constraints() {
        let key = master();
        let enc = encrypt_email(&key, "alice@example.com").unwrap();
        assert!(enc.ciphertext_b64.len() >= 16);
        assert_eq!(enc.salt_hex.len(), 32);
        assert!(enc.salt_hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = master();
        let enc = encrypt_email(&key, "alice@example.com").unwrap();

        let mut packed = base64::engine::general_purpose::STANDARD
            .decode(&enc.ciphertext_b64)
            .unwrap();
        // Flip one bit in the ciphertext body.
        let idx = packed.len() / 2;
        packed[idx] ^= 0x01;
        let tampered = base64::engine::general_purpose::STANDARD.encode(&packed);

        let err = decrypt_email(&key, &tampered, &enc.salt_hex).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn wrong_master_key_fails_authentication() {
        let enc = encrypt_email(&master(), "alice@example.com").unwrap();
        let err = decrypt_email(&master(), &enc.ciphertext_b64, &enc.salt_hex).unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let key = master();
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 8]);
        let err = decrypt_email(&key, &short, &hex::encode([0u8; 16])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidEncoding(_)));
    }
}
