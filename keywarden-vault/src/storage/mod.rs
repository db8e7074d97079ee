//! PostgreSQL credentials store.
//!
//! The unique indexes on `email_hash` and `ssh_public_key` are the
//! authoritative uniqueness check; the in-transaction pre-checks exist only
//! to fail early with a friendly conflict before the insert is attempted.
//! Error mapping keys off SQLSTATE codes, never off message text.

mod queries;

use chrono::{DateTime, Utc};
use keywarden_core::crypto::{decrypt_email, MasterKey};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// One persisted user record. Immutable after insert except for
/// `updated_at` and `last_access_at`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredUser {
    pub email_hash: String,
    pub encrypted_email: String,
    pub email_salt: String,
    pub password_hash: String,
    pub password_salt: String,
    pub ssh_public_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_access_at: Option<DateTime<Utc>>,
}

/// Fields of a record about to be inserted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email_hash: String,
    pub encrypted_email: String,
    pub email_salt: String,
    pub password_hash: String,
    pub password_salt: String,
    pub ssh_public_key: String,
}

/// Anonymous usage statistics; no personally identifiable data.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub registrations_today: i64,
}

/// Categorised storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("email hash already registered")]
    EmailHashExists,

    #[error("SSH public key already registered")]
    SshKeyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("database unavailable")]
    Unavailable,

    #[error("database operation failed")]
    Operation,
}

/// Map a sqlx error onto the storage taxonomy using structured SQLSTATE
/// codes. The full error is logged here with its operation tag; callers
/// only ever see the category.
fn map_sqlx_error(err: sqlx::Error, operation: &str) -> StorageError {
    match &err {
        sqlx::Error::RowNotFound => return StorageError::UserNotFound,
        sqlx::Error::Database(db) => {
            if let Some(code) = db.code() {
                // Unique violation: decide which constraint fired.
                if code == "23505" {
                    let constraint = db.constraint().unwrap_or_default();
                    warn!(operation, constraint, "unique constraint violation");
                    if constraint.contains("ssh") {
                        return StorageError::SshKeyExists;
                    }
                    return StorageError::EmailHashExists;
                }
                // Connection-class (08xxx), too many connections, shutdown.
                if code.starts_with("08") || code == "53300" || code == "57P01" {
                    error!(operation, %code, error = %db.message(), "database connection error");
                    return StorageError::Unavailable;
                }
            }
            error!(operation, error = %db.message(), "database error");
            return StorageError::Operation;
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            error!(operation, error = %err, "database unreachable");
            return StorageError::Unavailable;
        }
        _ => {}
    }
    error!(operation, error = %err, "unexpected database error");
    StorageError::Operation
}

/// The credentials store. Owns the connection pool and the master key used
/// for administrative email decryption.
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    /// Connect with the pipeline-wide pool settings and per-session
    /// timeouts.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .max_lifetime(Duration::from_secs(30 * 60))
            .idle_timeout(Duration::from_secs(5 * 60))
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    use sqlx::Executor;
                    conn.execute("SET statement_timeout = '5s'").await?;
                    conn.execute("SET idle_in_transaction_session_timeout = '60s'")
                        .await?;
                    conn.execute("SET lock_timeout = '10s'").await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error(e, "connect"))?;

        info!("credentials store connected");
        Ok(Self { pool })
    }

    /// Cheap duplicate pre-check run before the expensive password hash.
    /// Advisory only: the transactional insert remains authoritative.
    pub async fn ensure_available(
        &self,
        email_hash: &str,
        ssh_public_key: &str,
    ) -> Result<(), StorageError> {
        let email_taken: bool = sqlx::query_scalar(queries::EMAIL_HASH_EXISTS)
            .bind(email_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "ensure_available.email"))?;
        if email_taken {
            warn!(email_hash = %&email_hash[..16], "registration attempt with existing email hash");
            return Err(StorageError::EmailHashExists);
        }

        let key_taken: bool = sqlx::query_scalar(queries::SSH_KEY_EXISTS)
            .bind(ssh_public_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "ensure_available.ssh"))?;
        if key_taken {
            warn!("registration attempt with existing SSH key");
            return Err(StorageError::SshKeyExists);
        }
        Ok(())
    }

    /// Insert one user atomically. Uniqueness is re-checked inside the
    /// transaction and finally enforced by the unique indexes themselves; a
    /// race between two registrations resolves to exactly one row and one
    /// conflict error.
    pub async fn store_user(&self, user: NewUser) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, "store_user.begin"))?;

        let email_taken: bool = sqlx::query_scalar(queries::EMAIL_HASH_EXISTS)
            .bind(&user.email_hash)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, "store_user.check_email"))?;
        if email_taken {
            return Err(StorageError::EmailHashExists);
        }

        let key_taken: bool = sqlx::query_scalar(queries::SSH_KEY_EXISTS)
            .bind(&user.ssh_public_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, "store_user.check_ssh"))?;
        if key_taken {
            return Err(StorageError::SshKeyExists);
        }

        let now = Utc::now();
        sqlx::query(queries::INSERT_USER)
            .bind(&user.email_hash)
            .bind(&user.encrypted_email)
            .bind(&user.email_salt)
            .bind(&user.password_hash)
            .bind(&user.password_salt)
            .bind(&user.ssh_public_key)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, "store_user.insert"))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(e, "store_user.commit"))?;

        info!(email_hash = %&user.email_hash[..16], "user credentials stored");
        Ok(())
    }

    /// Fetch a complete record by email hash.
    #[allow(dead_code)]
    pub async fn get_user_by_email_hash(
        &self,
        email_hash: &str,
    ) -> Result<Option<StoredUser>, StorageError> {
        sqlx::query_as(queries::GET_USER_BY_EMAIL_HASH)
            .bind(email_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "get_user_by_email_hash"))
    }

    /// Touch `last_access_at` for security monitoring.
    #[allow(dead_code)]
    pub async fn update_last_access(&self, email_hash: &str) -> Result<(), StorageError> {
        let result = sqlx::query(queries::UPDATE_LAST_ACCESS)
            .bind(email_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "update_last_access"))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound);
        }
        Ok(())
    }

    /// Permanently delete a user record.
    #[allow(dead_code)]
    pub async fn delete_user(&self, email_hash: &str) -> Result<(), StorageError> {
        let result = sqlx::query(queries::DELETE_USER)
            .bind(email_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "delete_user"))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound);
        }
        info!(email_hash = %&email_hash[..16], "user permanently deleted");
        Ok(())
    }

    /// Aggregate statistics for operational monitoring.
    pub async fn user_stats(&self) -> Result<UserStats, StorageError> {
        let total_users: i64 = sqlx::query_scalar(queries::COUNT_TOTAL_USERS)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "user_stats.total"))?;
        let active_users: i64 = sqlx::query_scalar(queries::COUNT_ACTIVE_USERS)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "user_stats.active"))?;
        let registrations_today: i64 = sqlx::query_scalar(queries::COUNT_REGISTRATIONS_TODAY)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "user_stats.today"))?;
        Ok(UserStats {
            total_users,
            active_users,
            registrations_today,
        })
    }

    /// Connectivity probe for the health endpoint.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let row = sqlx::query(queries::HEALTH_CHECK)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, "health_check"))?;
        let _: i32 = row.try_get(0).map_err(|e| map_sqlx_error(e, "health_check"))?;
        Ok(())
    }

    /// Administrative decryption of a stored email. Rare path; every
    /// invocation lands in the audit log.
    #[allow(dead_code)]
    pub fn decrypt_user_email(
        &self,
        master_key: &MasterKey,
        encrypted_email: &str,
        email_salt: &str,
    ) -> Result<String, keywarden_core::crypto::CryptoError> {
        let plaintext = decrypt_email(master_key, encrypted_email, email_salt)?;
        warn!("audit: administrative email decryption performed");
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_io_errors_map_to_unavailable() {
        let err = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            map_sqlx_error(err, "test"),
            StorageError::Unavailable
        ));
    }

    #[test]
    fn row_not_found_maps_to_user_not_found() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound, "test"),
            StorageError::UserNotFound
        ));
    }

    #[test]
    fn pool_timeout_maps_to_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut, "test"),
            StorageError::Unavailable
        ));
    }

    #[test]
    fn storage_errors_never_embed_database_detail() {
        // The Display impls are the strings that may reach a response body
        // builder; they must stay generic.
        for err in [
            StorageError::Unavailable,
            StorageError::Operation,
            StorageError::UserNotFound,
        ] {
            let text = err.to_string().to_lowercase();
            assert!(!text.contains("sqlstate"));
            assert!(!text.contains("postgres"));
        }
    }
}
