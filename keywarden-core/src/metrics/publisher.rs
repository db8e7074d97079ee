//! Staggered MQTT publication of aggregated metrics.

use super::MetricsAggregator;
use rand::Rng;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, info, warn};

/// Default broker port for `ssl://` URLs that omit one.
const DEFAULT_BROKER_PORT: u16 = 8883;

/// Parse an `ssl://host:port` broker URL into host and port.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), PublisherError> {
    let rest = url
        .strip_prefix("ssl://")
        .ok_or_else(|| PublisherError::Config(format!("broker URL must start with ssl:// : {url}")))?;
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| PublisherError::Config(format!("invalid broker port in {url}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), DEFAULT_BROKER_PORT)),
    }
}

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("publisher configuration error: {0}")]
    Config(String),
}

/// Publisher tuning. The defaults implement the fleet-wide publication
/// contract: staggered start, 120 s cadence, 5 s per-message wait.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// MQTT client id; must equal the service identifier so the broker's
    /// per-identity ACL matches the publish topic.
    pub client_id: String,
    pub publish_interval: Duration,
    pub max_stagger: Duration,
    pub ack_timeout: Duration,
    pub keep_alive: Duration,
}

impl PublisherConfig {
    pub fn new(broker_host: String, broker_port: u16, client_id: String) -> Self {
        Self {
            broker_host,
            broker_port,
            client_id,
            publish_interval: Duration::from_secs(120),
            max_stagger: Duration::from_secs(60),
            ack_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Periodic metrics publisher for one service.
///
/// Owns the MQTT client and two tasks: the rumqttc event loop (with
/// exponential reconnect backoff capped at 60 s) and the publication loop.
/// Publish failures are logged and the point dropped -- the serving path is
/// never blocked and no point is retried past the broker's QoS 1 handling.
pub struct MetricsPublisher {
    client: AsyncClient,
    aggregator: Arc<MetricsAggregator>,
    topic: String,
    ack_timeout: Duration,
    shutting_down: Arc<AtomicBool>,
    stop: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl MetricsPublisher {
    /// Connect to the broker and start the publication tasks.
    ///
    /// Publishers use clean sessions: a restarted publisher has nothing to
    /// resume, it simply begins a fresh cadence.
    pub fn start(
        config: PublisherConfig,
        tls: Arc<rustls::ClientConfig>,
        aggregator: Arc<MetricsAggregator>,
    ) -> Self {
        let topic = format!("metrics/{}", aggregator.service());

        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(tls)));

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        let shutting_down = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());
        let mut tasks = Vec::new();

        // Event loop: polling drives the connection, including automatic
        // reconnects. Backoff doubles per failure, capped at 60 s.
        {
            let shutting_down = shutting_down.clone();
            tasks.push(tokio::spawn(async move {
                let mut backoff = Duration::from_secs(1);
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("connected to MQTT broker for metrics publishing");
                            backoff = Duration::from_secs(1);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if shutting_down.load(Ordering::SeqCst) {
                                return;
                            }
                            warn!(error = %e, "lost connection to MQTT broker, reconnecting");
                            sleep(backoff).await;
                            backoff = (backoff * 2).min(Duration::from_secs(60));
                        }
                    }
                }
            }));
        }

        // Publication loop: random stagger, then a fixed cadence.
        {
            let client = client.clone();
            let aggregator = aggregator.clone();
            let topic = topic.clone();
            let stop = stop.clone();
            let shutting_down = shutting_down.clone();
            let publish_interval = config.publish_interval;
            let ack_timeout = config.ack_timeout;
            let initial_delay = Duration::from_secs(
                rand::thread_rng().gen_range(0..config.max_stagger.as_secs().max(1)),
            );

            tasks.push(tokio::spawn(async move {
                info!(delay_secs = initial_delay.as_secs(), "staggering first metrics publication");
                tokio::select! {
                    _ = sleep(initial_delay) => {}
                    _ = stop.notified() => return,
                }

                let mut ticker = interval(publish_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if !shutting_down.load(Ordering::SeqCst) {
                                publish_snapshot(&client, &aggregator, &topic, ack_timeout).await;
                            }
                        }
                        _ = stop.notified() => {
                            info!("stopping metrics publication");
                            return;
                        }
                    }
                }
            }));
        }

        Self {
            client,
            aggregator,
            topic,
            ack_timeout: config.ack_timeout,
            shutting_down,
            stop,
            tasks,
        }
    }

    /// Stop the cadence, publish one final snapshot best-effort, and
    /// disconnect. Idempotent: only the first call does any work.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down metrics publisher");
        self.stop.notify_waiters();

        publish_snapshot(&self.client, &self.aggregator, &self.topic, self.ack_timeout).await;

        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect after shutdown");
        }
        // Give the event loop a moment to flush the disconnect.
        sleep(Duration::from_millis(100)).await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Publish the current snapshot, one payload per point, QoS 1, not retained.
async fn publish_snapshot(
    client: &AsyncClient,
    aggregator: &MetricsAggregator,
    topic: &str,
    ack_timeout: Duration,
) {
    let snapshot = aggregator.snapshot();
    if snapshot.is_empty() {
        return;
    }

    let mut published = 0usize;
    let mut failed = 0usize;
    for metric in &snapshot {
        let payload = match serde_json::to_vec(metric) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialise metric");
                failed += 1;
                continue;
            }
        };
        match timeout(
            ack_timeout,
            client.publish(topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        {
            Ok(Ok(())) => published += 1,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to publish metric");
                failed += 1;
            }
            Err(_) => {
                warn!("timeout publishing metric");
                failed += 1;
            }
        }
    }

    if published > 0 {
        debug!(published, topic, "published metrics");
    }
    if failed > 0 {
        warn!(failed, topic, "dropped metrics after publish failures");
    }
}
