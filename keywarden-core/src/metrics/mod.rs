//! Zero-knowledge operational metrics.
//!
//! The model here is shared by every publisher and by the collector: one
//! [`Metric`] per MQTT payload, labels restricted to bounded closed
//! vocabularies, and never any user-identifying data.

mod aggregator;
mod publisher;

pub use aggregator::MetricsAggregator;
pub use publisher::{parse_broker_url, MetricsPublisher, PublisherConfig};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape limits enforced by the collector and respected by publishers.
pub const MAX_METRIC_NAME_LENGTH: usize = 256;
pub const MAX_LABELS_PER_METRIC: usize = 20;
pub const MAX_LABEL_KEY_LENGTH: usize = 128;
pub const MAX_LABEL_VALUE_LENGTH: usize = 256;

/// Aggregation behaviour of a metric, mirroring the Prometheus taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Monotonically increasing, resets on restart.
    Counter,
    /// Goes up and down.
    Gauge,
    /// Distribution of observed values.
    Histogram,
    /// Pre-computed quantiles.
    Summary,
}

/// One metric data point as serialised onto the bus.
///
/// Labels use a `BTreeMap` so serialisation order is canonical rather than
/// insertion-dependent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub service: String,
    /// Unix seconds at collection time.
    pub timestamp: i64,
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
}

/// Collapse dynamic path segments so paths stay usable as metric labels.
///
/// Numeric and UUID segments become `{id}`, email-looking segments become
/// `{email}`. Everything else passes through untouched.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for segment in path.split('/') {
        if !out.is_empty() || path.starts_with('/') {
            out.push('/');
        }
        if segment.is_empty() {
            continue;
        }
        if segment.chars().all(|c| c.is_ascii_digit())
            || uuid::Uuid::parse_str(segment).is_ok()
        {
            out.push_str("{id}");
        } else if segment.contains('@') && segment.contains('.') {
            out.push_str("{email}");
        } else {
            out.push_str(segment);
        }
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        out
    }
}

/// Group an HTTP status code into its class label (`2xx`, `4xx`, ...).
pub fn status_class(status: u16) -> String {
    format!("{}xx", status / 100)
}

/// Map a free-form error description into the closed error-type vocabulary.
///
/// Plain linear substring scans over the lowercased input keep label
/// cardinality bounded regardless of what the underlying library reported.
pub fn classify_error_type(error: &str) -> &'static str {
    let lower = error.to_lowercase();
    if lower.contains("timeout") {
        "timeout"
    } else if lower.contains("connection") {
        "connection"
    } else if lower.contains("certificate") {
        "certificate"
    } else if lower.contains("tls") {
        "tls"
    } else {
        "internal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dynamic_segments() {
        assert_eq!(normalize_path("/api/register"), "/api/register");
        assert_eq!(normalize_path("/users/12345"), "/users/{id}");
        assert_eq!(
            normalize_path("/users/123e4567-e89b-12d3-a456-426614174000/keys"),
            "/users/{id}/keys"
        );
        assert_eq!(
            normalize_path("/verify/user@example.com"),
            "/verify/{email}"
        );
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn status_classes() {
        assert_eq!(status_class(201), "2xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(503), "5xx");
    }

    #[test]
    fn error_classification_is_closed() {
        assert_eq!(classify_error_type("connect timeout reached"), "timeout");
        assert_eq!(classify_error_type("Connection refused"), "connection");
        assert_eq!(classify_error_type("bad TLS handshake"), "tls");
        assert_eq!(
            classify_error_type("certificate verify failed"),
            "certificate"
        );
        assert_eq!(classify_error_type("what even is this"), "internal");
    }

    #[test]
    fn metric_serializes_with_type_field() {
        let mut labels = BTreeMap::new();
        labels.insert("result".to_string(), "success".to_string());
        let metric = Metric {
            service: "entry-hub".to_string(),
            timestamp: 1_700_000_000,
            name: "registrations_total".to_string(),
            value: 3.0,
            labels,
            metric_type: MetricType::Counter,
        };
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["type"], "counter");
        assert_eq!(json["labels"]["result"], "success");
    }

    #[test]
    fn label_order_is_canonical() {
        let mut a = BTreeMap::new();
        a.insert("z".to_string(), "1".to_string());
        a.insert("a".to_string(), "2".to_string());
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "2".to_string());
        b.insert("z".to_string(), "1".to_string());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
