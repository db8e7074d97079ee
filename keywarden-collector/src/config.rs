//! Metrics-collector configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Admin API listen address. Loopback by default; exposing it further
    /// is a deployment decision.
    pub admin_listen_addr: String,

    /// MQTT broker URL (`ssl://host:port`).
    pub broker_url: String,
    /// Subscriber identity presented to the broker.
    pub broker_client_id: String,
    pub broker_cert: PathBuf,
    pub broker_key: PathBuf,
    pub ca_cert: PathBuf,

    /// From `METRICS_DATABASE_URL`; never serialised.
    #[serde(skip)]
    pub metrics_database_url: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            admin_listen_addr: "127.0.0.1:8446".to_string(),
            broker_url: "ssl://mqtt-broker:8883".to_string(),
            broker_client_id: "metrics-collector-subscriber".to_string(),
            broker_cert: PathBuf::from("certs/metrics-collector/subscriber.crt"),
            broker_key: PathBuf::from("certs/metrics-collector/subscriber.key"),
            ca_cert: PathBuf::from("certs/ca/ca.crt"),
            metrics_database_url: String::new(),
        }
    }
}

impl CollectorConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.metrics_database_url = std::env::var("METRICS_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("METRICS_DATABASE_URL must be set"))?;
        if let Ok(url) = std::env::var("BROKER_URL") {
            self.broker_url = url;
        }
        if let Ok(id) = std::env::var("BROKER_CLIENT_ID") {
            self.broker_client_id = id;
        }
        Ok(())
    }
}
