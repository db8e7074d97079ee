//! OpenSSH public key validation.
//!
//! Checks the textual algorithm token, decodes the base64 body, and verifies
//! the wire-format blob: the first length-prefixed string inside the blob
//! must repeat the algorithm token, and the blob size must fall inside the
//! band expected for that algorithm.

use super::ValidationFailure;
use base64::Engine;

/// Recognised algorithm tokens with the accepted size band (in bytes) for
/// the decoded wire blob.
///
/// The bands bracket the sizes produced by `ssh-keygen` for each algorithm:
/// Ed25519 blobs are fixed-size, ECDSA varies with the curve, RSA with the
/// modulus (2048 through 8192 bits).
pub const SSH_ALGORITHMS: &[(&str, usize, usize)] = &[
    ("ssh-rsa", 260, 1200),
    ("ssh-ed25519", 48, 64),
    ("ecdsa-sha2-nistp256", 96, 112),
    ("ecdsa-sha2-nistp384", 116, 148),
    ("ecdsa-sha2-nistp521", 148, 184),
    ("sk-ssh-ed25519@openssh.com", 56, 112),
    ("sk-ecdsa-sha2-nistp256@openssh.com", 104, 176),
];

/// Validate an OpenSSH-format public key string.
pub fn validate_ssh_key(key: &str) -> Result<(), ValidationFailure> {
    let mut parts = key.split_whitespace();
    let token = parts.next().ok_or(ValidationFailure::InvalidSshKey)?;
    let body = parts.next().ok_or(ValidationFailure::InvalidSshKey)?;
    // Anything after the body is a free-form comment and is not validated.

    let (_, min, max) = SSH_ALGORITHMS
        .iter()
        .find(|(t, _, _)| *t == token)
        .ok_or(ValidationFailure::InvalidSshKey)?;

    let blob = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|_| ValidationFailure::InvalidSshKey)?;

    if blob.len() < *min || blob.len() > *max {
        return Err(ValidationFailure::InvalidSshKey);
    }

    // Wire format: uint32 length || algorithm name || key material. The
    // embedded name must match the textual token or the key was spliced.
    if blob.len() < 4 {
        return Err(ValidationFailure::InvalidSshKey);
    }
    let name_len = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    let name_end = 4usize
        .checked_add(name_len)
        .ok_or(ValidationFailure::InvalidSshKey)?;
    if name_end > blob.len() {
        return Err(ValidationFailure::InvalidSshKey);
    }
    if &blob[4..name_end] != token.as_bytes() {
        return Err(ValidationFailure::InvalidSshKey);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    /// Build a syntactically valid key body for an algorithm with the given
    /// amount of trailing key material.
    fn synth_key(token: &str, material_len: usize) -> String {
        let mut blob = Vec::new();
        blob.extend_from_slice(&(token.len() as u32).to_be_bytes());
        blob.extend_from_slice(token.as_bytes());
        blob.extend(std::iter::repeat(0x42u8).take(material_len));
        format!(
            "{} {}",
            token,
            base64::engine::general_purpose::STANDARD.encode(&blob)
        )
    }

    #[test]
    fn accepts_real_ed25519_key() {
        let key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFzteWd1NdP+V10PkFmXfZ3rq7igAszd6adYDZ3dUjBO alice@host";
        assert!(validate_ssh_key(key).is_ok());
    }

    #[test]
    fn accepts_synthetic_keys_in_band() {
        assert!(validate_ssh_key(&synth_key("ssh-ed25519", 36)).is_ok());
        assert!(validate_ssh_key(&synth_key("ecdsa-sha2-nistp256", 80)).is_ok());
        assert!(validate_ssh_key(&synth_key("ssh-rsa", 300)).is_ok());
    }

    #[test]
    fn rejects_unknown_algorithm() {
        assert_eq!(
            validate_ssh_key(&synth_key("ssh-dss", 80)),
            Err(ValidationFailure::InvalidSshKey)
        );
    }

    #[test]
    fn rejects_bad_base64() {
        assert_eq!(
            validate_ssh_key("ssh-ed25519 !!!not-base64!!!"),
            Err(ValidationFailure::InvalidSshKey)
        );
    }

    #[test]
    fn rejects_blob_outside_band() {
        // Ed25519 band tops out at 64 bytes; 200 bytes of material is bogus.
        assert_eq!(
            validate_ssh_key(&synth_key("ssh-ed25519", 200)),
            Err(ValidationFailure::InvalidSshKey)
        );
    }

    #[test]
    fn rejects_spliced_token() {
        // Body encodes ssh-rsa but the text token claims ed25519.
        let rsa_body = synth_key("ssh-rsa", 300);
        let body = rsa_body.split_whitespace().nth(1).unwrap();
        let spliced = format!("ssh-ed25519 {body}");
        assert_eq!(
            validate_ssh_key(&spliced),
            Err(ValidationFailure::InvalidSshKey)
        );
    }

    #[test]
    fn rejects_missing_body() {
        assert_eq!(
            validate_ssh_key("ssh-ed25519"),
            Err(ValidationFailure::InvalidSshKey)
        );
    }
}
