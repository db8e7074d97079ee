//! Keywarden Security Switch
//!
//! Middle gateway of the registration pipeline. Requires a client
//! certificate with Organization `Hub`, re-validates every submission, and
//! forwards to the database-vault over mTLS.

mod config;
mod handlers;

use clap::Parser;
use keywarden_core::metrics::{parse_broker_url, MetricsAggregator, MetricsPublisher, PublisherConfig};
use keywarden_core::server::{self, OrgPolicy};
use keywarden_core::service_names::SECURITY_SWITCH;
use keywarden_core::tls;
use keywarden_core::upstream::UpstreamClient;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keywarden-switch", about = "Keywarden mTLS security checkpoint")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "switch.toml")]
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
        config::SwitchConfig::load(&cli.config)?
    } else {
        tracing::info!("no config file found, using defaults");
        let mut cfg = config::SwitchConfig::default();
        cfg.apply_env();
        cfg
    };
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }

    let aggregator = Arc::new(MetricsAggregator::new(SECURITY_SWITCH));

    let client_tls = tls::client_config(&cfg.ca_cert, &cfg.client_cert, &cfg.client_key, "Vault")?;
    let upstream = Arc::new(UpstreamClient::new(client_tls, cfg.vault_endpoint.clone())?);

    let publisher = start_publisher(&cfg, aggregator.clone())?;

    let state = handlers::AppState {
        aggregator: aggregator.clone(),
        upstream,
    };
    let app = axum::Router::new()
        .route("/api/register", axum::routing::post(handlers::register))
        .route("/api/health", axum::routing::get(handlers::health))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            OrgPolicy::new("Hub"),
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
    tracing::info!(addr = %cfg.listen_addr, "security-switch listening (mTLS)");

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
    Ok(())
}

fn start_publisher(
    cfg: &config::SwitchConfig,
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
        PublisherConfig::new(host, port, SECURITY_SWITCH.to_string()),
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
