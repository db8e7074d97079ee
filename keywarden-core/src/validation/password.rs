//! Password strength validation.

use super::ValidationFailure;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

// Top entries of public breach corpora, lowercased. The comparison is
// case-insensitive so "Password" and "PASSWORD" hit the same entry.
static WEAK_PASSWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password", "password1", "password123", "passw0rd", "p@ssw0rd", "p@ssword",
        "123456", "1234567", "12345678", "123456789", "1234567890", "12345",
        "qwerty", "qwerty123", "qwertyuiop", "abc123", "abcd1234", "iloveyou",
        "admin", "admin123", "administrator", "root", "rootroot", "letmein",
        "welcome", "welcome1", "monkey", "dragon", "sunshine", "princess",
        "football", "baseball", "superman", "batman", "master", "shadow",
        "michael", "jennifer", "charlie", "jordan", "freedom", "whatever",
        "trustno1", "starwars", "summer2024", "winter2024", "changeme",
        "secret", "secret123", "default", "login", "access", "pass1234",
        "zaq12wsx", "1q2w3e4r", "qazwsx", "asdfgh", "asdf1234", "zxcvbnm",
        "696969", "666666", "111111", "000000", "121212", "654321",
    ]
    .into_iter()
    .collect()
});

/// Validate a password against length, the weak-password set, and the
/// character-category rule (at least 3 of: uppercase, lowercase, digits,
/// symbols).
pub fn validate_password(password: &str) -> Result<(), ValidationFailure> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationFailure::PasswordTooShort);
    }
    if WEAK_PASSWORDS.contains(password.to_lowercase().as_str()) {
        return Err(ValidationFailure::WeakPassword);
    }

    let mut upper = false;
    let mut lower = false;
    let mut digit = false;
    let mut symbol = false;
    for c in password.chars() {
        if c.is_ascii_uppercase() {
            upper = true;
        } else if c.is_ascii_lowercase() {
            lower = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else {
            symbol = true;
        }
    }
    let categories = [upper, lower, digit, symbol].iter().filter(|&&b| b).count();
    if categories < 3 {
        return Err(ValidationFailure::PasswordComplexity);
    }
    Ok(())
}
