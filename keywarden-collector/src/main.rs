//! Keywarden Metrics Collector
//!
//! Subscribes to `metrics/+` over mutually authenticated MQTT, rejects
//! anything that smells like user data, and persists the rest into a
//! time-partitioned store whose retention, compression, and rollup policies
//! are declared here at startup.

mod admin;
mod config;
mod exposition;
mod stats;
mod storage;
mod subscriber;
mod validate;

use clap::Parser;
use keywarden_core::metrics::parse_broker_url;
use keywarden_core::tls;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keywarden-collector", about = "Keywarden metrics collector")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "collector.toml")]
    config: PathBuf,

    /// Admin API listen address override
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut cfg = if cli.config.exists() {
        config::CollectorConfig::load(&cli.config)?
    } else {
        tracing::info!("no config file found, using defaults");
        let mut cfg = config::CollectorConfig::default();
        cfg.apply_env()?;
        cfg
    };
    if let Some(listen) = cli.listen {
        cfg.admin_listen_addr = listen;
    }

    let stats = Arc::new(stats::CollectorStats::new());

    let store = Arc::new(storage::MetricsStore::connect(&cfg.metrics_database_url, stats.clone()).await?);
    store.declare_policies().await?;

    let (broker_host, broker_port) = parse_broker_url(&cfg.broker_url)?;
    let broker_tls = tls::client_config(
        &cfg.ca_cert,
        &cfg.broker_cert,
        &cfg.broker_key,
        "MetricsBroker",
    )?;
    let subscriber = subscriber::Subscriber::start(
        subscriber::SubscriberConfig {
            broker_host,
            broker_port,
            client_id: cfg.broker_client_id.clone(),
        },
        Arc::new(broker_tls),
        store.clone(),
        stats.clone(),
    );

    let admin_state = admin::AdminState {
        store,
        stats,
        started_at: chrono::Utc::now(),
    };
    let app = admin::router(admin_state);
    let listener = tokio::net::TcpListener::bind(&cfg.admin_listen_addr).await?;
    tracing::info!(addr = %cfg.admin_listen_addr, "collector admin API listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    subscriber.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
