//! Database-vault configuration.
//!
//! The master encryption key and database URL only ever come from the
//! environment; they have no place in a config file on disk.

use keywarden_core::crypto::PasswordHashParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// mTLS listen address.
    pub listen_addr: String,
    pub max_body_size: usize,

    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub ca_cert: PathBuf,

    /// Argon2id tuning. Deployment configuration, not constants.
    #[serde(default)]
    pub password_hash: PasswordHashParams,

    #[serde(default)]
    pub broker_url: String,
    #[serde(default)]
    pub broker_cert: PathBuf,
    #[serde(default)]
    pub broker_key: PathBuf,

    /// From `DATABASE_URL`; never serialised.
    #[serde(skip)]
    pub database_url: String,
    /// From `MASTER_ENCRYPTION_KEY`; never serialised.
    #[serde(skip)]
    pub master_key_hex: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8445".to_string(),
            max_body_size: 65_536,
            server_cert: PathBuf::from("certs/database-vault/server.crt"),
            server_key: PathBuf::from("certs/database-vault/server.key"),
            ca_cert: PathBuf::from("certs/ca/ca.crt"),
            password_hash: PasswordHashParams::default(),
            broker_url: String::new(),
            broker_cert: PathBuf::new(),
            broker_key: PathBuf::new(),
            database_url: String::new(),
            master_key_hex: String::new(),
        }
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        if !self.database_url.contains("sslmode=") {
            anyhow::bail!("DATABASE_URL must enforce a TLS mode (sslmode=...)");
        }
        self.master_key_hex = std::env::var("MASTER_ENCRYPTION_KEY")
            .map_err(|_| anyhow::anyhow!("MASTER_ENCRYPTION_KEY must be set"))?;
        if let Ok(url) = std::env::var("BROKER_URL") {
            self.broker_url = url;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_never_serialise() {
        let mut config = VaultConfig::default();
        config.database_url = "postgres://u:p@host/db?sslmode=require".to_string();
        config.master_key_hex = "aa".repeat(32);
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("postgres://"));
        assert!(!rendered.contains("aaaa"));
    }

    #[test]
    fn password_params_configurable_from_toml() {
        let parsed: VaultConfig = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:8445"
            max_body_size = 65536
            server_cert = "s.crt"
            server_key = "s.key"
            ca_cert = "ca.crt"

            [password_hash]
            memory_kib = 65536
            iterations = 2
            parallelism = 2
            "#,
        )
        .unwrap();
        assert_eq!(parsed.password_hash.memory_kib, 65_536);
        assert_eq!(parsed.password_hash.iterations, 2);
    }
}
