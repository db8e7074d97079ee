//! Master encryption key handling.

use crate::crypto::{CryptoError, Result};
use zeroize::ZeroizeOnDrop;

/// Minimum number of distinct byte values a master key must contain.
///
/// A rudimentary entropy floor: it rejects all-zero keys, repeated-pattern
/// keys, and short keys padded out by hand, without attempting a real
/// statistical test.
const MIN_DISTINCT_BYTES: usize = 8;

/// The process-wide AES-256 master key.
///
/// Loaded once at startup from a 64-hex-character string, validated, and
/// zeroised when the process tears down. Per-record keys are derived from it
/// via HKDF and never outlive a single encrypt/decrypt call.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    /// Parse and validate a master key from its hex representation.
    ///
    /// # Security
    /// - Requires exactly 32 bytes (AES-256)
    /// - Rejects keys below the distinct-byte entropy floor
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidMasterKey(format!("not valid hex: {e}")))?;
        let key: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidMasterKey(format!("AES-256 requires 32 bytes, got {}", v.len()))
        })?;
        Self::from_bytes(key)
    }

    /// Validate and wrap raw key bytes.
    pub fn from_bytes(key: [u8; 32]) -> Result<Self> {
        let mut seen = [false; 256];
        for b in key {
            seen[b as usize] = true;
        }
        let distinct = seen.iter().filter(|&&s| s).count();
        if distinct < MIN_DISTINCT_BYTES {
            return Err(CryptoError::InvalidMasterKey(format!(
                "insufficient entropy: {distinct} distinct byte values"
            )));
        }
        Ok(Self { key })
    }

    /// Raw key bytes, for HKDF input only.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}
