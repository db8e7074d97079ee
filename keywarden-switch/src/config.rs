//! Security-switch configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// mTLS listen address.
    pub listen_addr: String,
    /// Database-vault storage endpoint.
    pub vault_endpoint: String,
    pub max_body_size: usize,

    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_cert: PathBuf,

    #[serde(default)]
    pub broker_url: String,
    #[serde(default)]
    pub broker_cert: PathBuf,
    #[serde(default)]
    pub broker_key: PathBuf,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8444".to_string(),
            vault_endpoint: "https://database-vault:8445/api/store-user".to_string(),
            max_body_size: 65_536,
            server_cert: PathBuf::from("certs/security-switch/server.crt"),
            server_key: PathBuf::from("certs/security-switch/server.key"),
            client_cert: PathBuf::from("certs/security-switch/client.crt"),
            client_key: PathBuf::from("certs/security-switch/client.key"),
            ca_cert: PathBuf::from("certs/ca/ca.crt"),
            broker_url: String::new(),
            broker_cert: PathBuf::new(),
            broker_key: PathBuf::new(),
        }
    }
}

impl SwitchConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BROKER_URL") {
            self.broker_url = url;
        }
    }
}
