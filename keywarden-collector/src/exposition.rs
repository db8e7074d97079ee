//! Prometheus text exposition of collector state and recent service
//! metrics.
//!
//! Rendering is a pure function over a stats snapshot and a batch of recent
//! rows, so the format is testable without a scraper or a database.

use crate::stats::StatsSnapshot;
use crate::storage::RecentMetric;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Exposition content type expected by Prometheus scrapers.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render the full exposition document: collector self-metrics first, then
/// recent service metrics grouped by name.
pub fn render(stats: &StatsSnapshot, recent: &[RecentMetric]) -> String {
    let mut out = String::new();
    write_collector_metrics(&mut out, stats);
    write_service_metrics(&mut out, recent);
    out
}

fn write_collector_metrics(out: &mut String, stats: &StatsSnapshot) {
    let _ = writeln!(
        out,
        "# HELP keywarden_metrics_collector_up Indicates if the metrics collector is running"
    );
    let _ = writeln!(out, "# TYPE keywarden_metrics_collector_up gauge");
    let _ = writeln!(out, "keywarden_metrics_collector_up 1\n");

    let counters = [
        (
            "keywarden_metrics_received_total",
            "Total number of metrics received from the bus",
            stats.metrics_received,
        ),
        (
            "keywarden_metrics_rejected_total",
            "Total number of metrics rejected by validation",
            stats.metrics_rejected,
        ),
        (
            "keywarden_metrics_stored_total",
            "Total number of metrics persisted to the time-series store",
            stats.metrics_stored,
        ),
        (
            "keywarden_metrics_failures_total",
            "Total number of metrics lost after exhausted store retries",
            stats.metrics_failures,
        ),
    ];
    for (name, help, value) in counters {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}\n");
    }

    let rejection_rate = if stats.metrics_received > 0 {
        stats.metrics_rejected as f64 / stats.metrics_received as f64 * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "# HELP keywarden_metrics_rejection_rate_percent Percentage of received metrics rejected"
    );
    let _ = writeln!(out, "# TYPE keywarden_metrics_rejection_rate_percent gauge");
    let _ = writeln!(
        out,
        "keywarden_metrics_rejection_rate_percent {rejection_rate:.2}\n"
    );
}

fn write_service_metrics(out: &mut String, recent: &[RecentMetric]) {
    // Group by metric name; BTreeMap keeps exposition ordering stable.
    let mut groups: BTreeMap<&str, Vec<&RecentMetric>> = BTreeMap::new();
    for metric in recent {
        groups.entry(metric.metric_name.as_str()).or_default().push(metric);
    }

    for (name, metrics) in groups {
        let metric_type = prometheus_type(&metrics[0].metric_type);
        let _ = writeln!(out, "# HELP {name} {}", metric_help(name));
        let _ = writeln!(out, "# TYPE {name} {metric_type}");
        for metric in metrics {
            let labels = format_labels(&metric.service, &metric.labels.0);
            let _ = writeln!(out, "{name}{labels} {}", metric.value);
        }
        let _ = writeln!(out);
    }
}

/// Format a label set, always leading with the service label. Values are
/// escaped per the exposition grammar.
fn format_labels(service: &str, labels: &BTreeMap<String, String>) -> String {
    let mut parts = vec![format!("service=\"{}\"", escape_label_value(service))];
    for (key, value) in labels {
        parts.push(format!("{key}=\"{}\"", escape_label_value(value)));
    }
    format!("{{{}}}", parts.join(","))
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn prometheus_type(metric_type: &str) -> &'static str {
    match metric_type {
        "counter" => "counter",
        "gauge" => "gauge",
        "histogram" => "histogram",
        "summary" => "summary",
        _ => "untyped",
    }
}

fn metric_help(name: &str) -> &'static str {
    match name {
        "requests_total" => "Total number of requests processed",
        "request_duration_milliseconds" => "Request latency quantiles in milliseconds",
        "registrations_total" => "Total number of registration attempts by result",
        "validation_failures_total" => "Total number of input validation failures by reason",
        "errors_total" => "Total number of errors by type",
        "connections_active" => "Number of active connections",
        _ => "Service metric",
    }
}
