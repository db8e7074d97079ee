//! Keywarden Database Vault
//!
//! Terminal service of the registration pipeline. Re-validates input,
//! encrypts the email, hashes the password, and persists exactly one row
//! per user. A bad master key aborts startup; nothing runs without it.

mod config;
mod error;
mod handlers;
mod storage;

use clap::Parser;
use keywarden_core::crypto::MasterKey;
use keywarden_core::metrics::{parse_broker_url, MetricsAggregator, MetricsPublisher, PublisherConfig};
use keywarden_core::server::{self, OrgPolicy};
use keywarden_core::service_names::DATABASE_VAULT;
use keywarden_core::tls;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keywarden-vault", about = "Keywarden credential persistence service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "vault.toml")]
    config: PathBuf,

    /// Listen address override
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
        config::VaultConfig::load(&cli.config)?
    } else {
        tracing::info!("no config file found, using defaults");
        let mut cfg = config::VaultConfig::default();
        cfg.apply_env()?;
        cfg
    };
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }

    // Master key validation failures abort the process before any socket
    // is bound.
    let master_key = Arc::new(MasterKey::from_hex(&cfg.master_key_hex)?);
    cfg.master_key_hex.clear();
    cfg.password_hash.validate()?;

    let aggregator = Arc::new(MetricsAggregator::new(DATABASE_VAULT));
    let store = Arc::new(storage::UserStore::connect(&cfg.database_url).await?);
    let publisher = start_publisher(&cfg, aggregator.clone())?;

    let state = handlers::AppState {
        aggregator: aggregator.clone(),
        store,
        master_key,
        password_params: cfg.password_hash,
    };
    let app = axum::Router::new()
        .route("/api/store-user", axum::routing::post(handlers::store_user))
        .route("/api/health", axum::routing::get(handlers::health))
        .route("/api/stats", axum::routing::get(handlers::stats))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            OrgPolicy::new("Switch"),
            server::require_peer_org,
        ))
        .layer(axum::middleware::from_fn_with_state(
            aggregator.clone(),
            server::track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(cfg.max_body_size));

    let server_tls = Arc::new(tls::mtls_server_config(
        &cfg.server_cert,
        &cfg.server_key,
        &cfg.ca_cert,
    )?);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!(addr = %cfg.listen_addr, "database-vault listening (mTLS)");

    tokio::select! {
        result = server::serve(listener, server_tls, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Some(publisher) = publisher {
        publisher.shutdown().await;
    }
    // MasterKey zeroises on drop when the last Arc goes away here.
    Ok(())
}

fn start_publisher(
    cfg: &config::VaultConfig,
    aggregator: Arc<MetricsAggregator>,
) -> anyhow::Result<Option<MetricsPublisher>> {
    if cfg.broker_url.is_empty() {
        tracing::info!("BROKER_URL not set, metrics publishing disabled");
        return Ok(None);
    }
    let (host, port) = parse_broker_url(&cfg.broker_url)?;
    let broker_tls = tls::client_config(
        &cfg.ca_cert,
        &cfg.broker_cert,
        &cfg.broker_key,
        "MetricsBroker",
    )?;
    let publisher = MetricsPublisher::start(
        PublisherConfig::new(host, port, DATABASE_VAULT.to_string()),
        Arc::new(broker_tls),
        aggregator,
    );
    Ok(Some(publisher))
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
