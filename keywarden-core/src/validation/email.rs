//! Email address validation.

use super::ValidationFailure;
use once_cell::sync::Lazy;
use regex::Regex;

// RFC 5322 subset: printable local part, dotted domain labels, 2+ letter TLD.
// Deliberately stricter than the full grammar -- quoted locals, comments, and
// address literals are not accepted by the backup service.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*\.[a-zA-Z]{2,}$")
        .expect("email regex is valid")
});

/// Validate an email address.
///
/// The multiple-`@` check runs before the format check: a second `@` is a
/// header-injection signature and is reported under its own reason class.
pub fn validate_email(email: &str) -> Result<(), ValidationFailure> {
    if email.is_empty() {
        return Err(ValidationFailure::MissingRequiredFields);
    }
    if email.matches('@').count() != 1 {
        return Err(ValidationFailure::EmailInjectionAttempt);
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ValidationFailure::InvalidEmail);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_addresses() {
        for addr in [
            "alice@example.com",
            "c@c.co",
            "first.last+tag@sub.domain.org",
            "x_y-z@host-name.io",
        ] {
            assert!(validate_email(addr).is_ok(), "should accept {addr}");
        }
    }

    #[test]
    fn rejects_malformed_addresses() {
        for addr in [
            "plainaddress",
            "@no-local.com",
            "trailing-dot@example.",
            "no-tld@host",
            "spaces in@example.com",
        ] {
            assert_eq!(
                validate_email(addr),
                Err(ValidationFailure::InvalidEmail),
                "should reject {addr}"
            );
        }
    }

    #[test]
    fn flags_multiple_at_signs_as_injection() {
        assert_eq!(
            validate_email("a@b@example.com"),
            Err(ValidationFailure::EmailInjectionAttempt)
        );
    }
}
