//! Entry-hub configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Public TLS listen address.
    pub listen_addr: String,
    /// Security-switch registration endpoint.
    pub switch_endpoint: String,
    /// Maximum accepted request body size in bytes.
    pub max_body_size: usize,

    /// Server certificate presented to clients.
    pub server_cert: PathBuf,
    pub server_key: PathBuf,

    /// Client certificate for the mTLS hop to the switch.
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    /// Private CA used to validate the switch's certificate.
    pub ca_cert: PathBuf,

    /// MQTT broker URL (`ssl://host:port`). Empty disables publication.
    #[serde(default)]
    pub broker_url: String,
    /// Client certificate for the metrics publisher.
    #[serde(default)]
    pub broker_cert: PathBuf,
    #[serde(default)]
    pub broker_key: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8443".to_string(),
            switch_endpoint: "https://security-switch:8444/api/register".to_string(),
            max_body_size: 65_536,
            server_cert: PathBuf::from("certs/entry-hub/server.crt"),
            server_key: PathBuf::from("certs/entry-hub/server.key"),
            client_cert: PathBuf::from("certs/entry-hub/client.crt"),
            client_key: PathBuf::from("certs/entry-hub/client.key"),
            ca_cert: PathBuf::from("certs/ca/ca.crt"),
            broker_url: String::new(),
            broker_cert: PathBuf::new(),
            broker_key: PathBuf::new(),
        }
    }
}

impl HubConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Environment variables override the file for deployment-sensitive
    /// values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BROKER_URL") {
            self.broker_url = url;
        }
    }
}
