//! SQL statements for the credentials store.
//!
//! All statements are parameterised; `email_hash` is the only identifier
//! ever used for lookups, so no query can leak a plaintext address.

pub const INSERT_USER: &str = "
    INSERT INTO users (
        email_hash, encrypted_email, email_salt,
        password_hash, password_salt, ssh_public_key,
        created_at, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

pub const GET_USER_BY_EMAIL_HASH: &str = "
    SELECT
        email_hash, encrypted_email, email_salt,
        password_hash, password_salt, ssh_public_key,
        created_at, updated_at, last_access_at
    FROM users
    WHERE email_hash = $1";

pub const EMAIL_HASH_EXISTS: &str = "
    SELECT EXISTS(SELECT 1 FROM users WHERE email_hash = $1)";

pub const SSH_KEY_EXISTS: &str = "
    SELECT EXISTS(SELECT 1 FROM users WHERE ssh_public_key = $1)";

pub const UPDATE_LAST_ACCESS: &str = "
    UPDATE users SET last_access_at = NOW() WHERE email_hash = $1";

pub const DELETE_USER: &str = "
    DELETE FROM users WHERE email_hash = $1";

pub const COUNT_TOTAL_USERS: &str = "SELECT COUNT(*) FROM users";

pub const COUNT_ACTIVE_USERS: &str = "
    SELECT COUNT(*) FROM users
    WHERE last_access_at > NOW() - INTERVAL '30 days'";

pub const COUNT_REGISTRATIONS_TODAY: &str = "
    SELECT COUNT(*) FROM users
    WHERE created_at > NOW() - INTERVAL '24 hours'";

pub const HEALTH_CHECK: &str = "SELECT 1";
