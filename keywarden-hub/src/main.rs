//! Keywarden Entry Hub
//!
//! Public entry point of the registration pipeline. Terminates client TLS,
//! runs the first validation layer, and forwards submissions to the
//! security-switch over mTLS.

mod config;
mod handlers;

use clap::Parser;
use keywarden_core::metrics::{parse_broker_url, MetricsAggregator, MetricsPublisher, PublisherConfig};
use keywarden_core::server;
use keywarden_core::service_names::ENTRY_HUB;
use keywarden_core::upstream::UpstreamClient;
use keywarden_core::{tls, validation};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keywarden-hub", about = "Keywarden public registration entry point")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "hub.toml")]
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
        config::HubConfig::load(&cli.config)?
    } else {
        tracing::info!("no config file found, using defaults");
        let mut cfg = config::HubConfig::default();
        cfg.apply_env();
        cfg
    };
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }

    // Warm the validator's lazy state so the first request pays no parse cost.
    let _ = validation::validate_email("probe@example.com");

    let aggregator = Arc::new(MetricsAggregator::new(ENTRY_HUB));

    // mTLS hop to the security-switch: chain validated against the private
    // CA, leaf pinned to Organization "Switch".
    let client_tls = tls::client_config(&cfg.ca_cert, &cfg.client_cert, &cfg.client_key, "Switch")?;
    let upstream = Arc::new(UpstreamClient::new(client_tls, cfg.switch_endpoint.clone())?);

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
            aggregator.clone(),
            server::track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(cfg.max_body_size));

    let server_tls = Arc::new(tls::public_server_config(&cfg.server_cert, &cfg.server_key)?);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!(addr = %cfg.listen_addr, "entry-hub listening");

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
    cfg: &config::HubConfig,
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
        PublisherConfig::new(host, port, ENTRY_HUB.to_string()),
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
