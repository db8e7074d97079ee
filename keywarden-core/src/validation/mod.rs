//! Defense-in-depth input validation.
//!
//! Every layer of the pipeline (hub, switch, vault) runs the exact same
//! checks: any single layer may be compromised, so no layer trusts the
//! validation performed by the one before it.

mod email;
mod password;
mod ssh;

pub use email::validate_email;
pub use password::validate_password;
pub use ssh::{validate_ssh_key, SSH_ALGORITHMS};

use crate::api::RegisterRequest;

/// Why a registration request was rejected.
///
/// The variants form a closed vocabulary: each maps to a stable metrics
/// label, so cardinality on the metrics plane is bounded no matter what the
/// client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    MissingRequiredFields,
    InvalidEmail,
    EmailInjectionAttempt,
    PasswordTooShort,
    WeakPassword,
    PasswordComplexity,
    InvalidSshKey,
}

impl ValidationFailure {
    /// Stable label value for the `validation_failures_total` counter.
    pub fn reason_label(self) -> &'static str {
        match self {
            Self::MissingRequiredFields => "missing_required_fields",
            Self::InvalidEmail => "invalid_email",
            Self::EmailInjectionAttempt => "email_injection_attempt",
            Self::PasswordTooShort => "password_too_short",
            Self::WeakPassword => "weak_password",
            Self::PasswordComplexity => "password_complexity",
            Self::InvalidSshKey => "invalid_ssh_key",
        }
    }

    /// Sanitised message returned to the caller. Never includes the input.
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingRequiredFields => "Email, password, and SSH public key are required.",
            Self::InvalidEmail | Self::EmailInjectionAttempt => "Invalid email format.",
            Self::PasswordTooShort => "Password must be at least 8 characters.",
            Self::WeakPassword => {
                "Password is too common, please choose a stronger password."
            }
            Self::PasswordComplexity => {
                "Password must contain at least 3 of: uppercase, lowercase, numbers, special characters."
            }
            Self::InvalidSshKey => "Invalid SSH public key format.",
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason_label())
    }
}

impl std::error::Error for ValidationFailure {}

/// Run the full validation ladder over a registration request.
///
/// Checks run in a fixed order and the first failure wins, so the reason
/// label reported by each layer is deterministic for a given input.
pub fn validate_request(req: &RegisterRequest) -> Result<(), ValidationFailure> {
    if req.email.is_empty() || req.password.is_empty() || req.ssh_public_key.is_empty() {
        return Err(ValidationFailure::MissingRequiredFields);
    }
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    validate_ssh_key(&req.ssh_public_key)?;
    Ok(())
}
