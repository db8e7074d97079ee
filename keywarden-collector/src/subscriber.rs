//! MQTT subscription pipeline.
//!
//! The collector holds a durable QoS 1 session (`clean_session = false`) so
//! a restart loses at most the broker's buffer. Message processing runs on
//! a worker task fed by a bounded channel, keeping the event loop free to
//! answer keep-alives while the database is slow.

use crate::stats::CollectorStats;
use crate::storage::MetricsStore;
use crate::validate::validate_metric;
use chrono::Utc;
use keywarden_core::metrics::Metric;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SUBSCRIBE_TOPIC: &str = "metrics/+";
const WORKER_QUEUE_DEPTH: usize = 10_000;

pub struct SubscriberConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
}

pub struct Subscriber {
    client: AsyncClient,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscriber {
    pub fn start(
        config: SubscriberConfig,
        tls: Arc<rustls::ClientConfig>,
        store: Arc<MetricsStore>,
        stats: Arc<CollectorStats>,
    ) -> Self {
        let mut options = MqttOptions::new(config.client_id, config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(60));
        // Durable session: the broker buffers QoS 1 messages across
        // subscriber restarts.
        options.set_clean_session(false);
        options.set_transport(Transport::Tls(TlsConfiguration::Rustls(tls)));

        let (client, mut eventloop) = AsyncClient::new(options, 256);
        let (tx, mut rx) = mpsc::channel::<(String, Vec<u8>)>(WORKER_QUEUE_DEPTH);

        let mut tasks = Vec::new();

        // Event loop: resubscribes on every (re)connection and hands
        // publishes to the worker.
        {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let mut backoff = Duration::from_secs(1);
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!("connected to MQTT broker");
                            backoff = Duration::from_secs(1);
                            if let Err(e) =
                                client.subscribe(SUBSCRIBE_TOPIC, QoS::AtLeastOnce).await
                            {
                                warn!(error = %e, "failed to subscribe to {SUBSCRIBE_TOPIC}");
                            } else {
                                info!("subscribed to {SUBSCRIBE_TOPIC}");
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let message = (publish.topic.clone(), publish.payload.to_vec());
                            if tx.try_send(message).is_err() {
                                warn!("metric worker queue full, dropping message");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "MQTT connection error, reconnecting");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(Duration::from_secs(60));
                        }
                    }
                }
            }));
        }

        // Worker: runs the validation pipeline and persists survivors.
        {
            let store = store.clone();
            let stats = stats.clone();
            tasks.push(tokio::spawn(async move {
                while let Some((topic, payload)) = rx.recv().await {
                    handle_message(&topic, &payload, &store, &stats).await;
                }
            }));
        }

        Self { client, tasks }
    }

    pub async fn shutdown(&self) {
        info!("disconnecting from MQTT broker");
        if let Err(e) = self.client.unsubscribe(SUBSCRIBE_TOPIC).await {
            debug!(error = %e, "unsubscribe failed during shutdown");
        }
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "disconnect failed during shutdown");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Per-message pipeline, in contract order. Any failing step rejects the
/// message: the rejection counter is bumped, the reason is logged with the
/// service name, and nothing reaches the store.
async fn handle_message(
    topic: &str,
    payload: &[u8],
    store: &MetricsStore,
    stats: &CollectorStats,
) {
    stats.record_received();

    // Topic shape: exactly ["metrics", <service>].
    let service = match parse_topic(topic) {
        Some(service) => service,
        None => {
            warn!(topic, "rejected metric: invalid topic format");
            stats.record_rejected();
            return;
        }
    };

    // Structural validation happens at deserialisation; the closed
    // MetricType enum also rejects unknown types here.
    let metric: Metric = match serde_json::from_slice(payload) {
        Ok(metric) => metric,
        Err(e) => {
            warn!(service, error = %e, "rejected metric: unparseable payload");
            stats.record_rejected();
            store.record_validation_error(service, "unparseable_payload").await;
            return;
        }
    };

    if let Err(reason) = validate_metric(&metric, service, Utc::now().timestamp()) {
        warn!(service, reason = %reason, "rejected metric");
        stats.record_rejected();
        store.record_validation_error(service, reason.as_str()).await;
        return;
    }

    // Storage failures are not rejections: validation passed, the point was
    // simply lost, and the store's failure counter records that.
    if let Err(e) = store.store_metric(&metric).await {
        warn!(service, error = %e, "failed to store metric");
    }
}

fn parse_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("metrics"), Some(service), None) if !service.is_empty() => Some(service),
        _ => None,
    }
}
