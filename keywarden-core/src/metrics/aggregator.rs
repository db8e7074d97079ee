//! In-process metrics aggregation.

use super::{classify_error_type, normalize_path, status_class, Metric, MetricType};
use crate::validation::ValidationFailure;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Cap on the latency sample buffer. On overflow the oldest half is dropped,
/// which biases quantiles toward recent traffic but bounds memory.
const MAX_DURATION_SAMPLES: usize = 10_000;

#[derive(Default)]
struct Inner {
    /// Keyed by (method, normalised path, status class).
    requests_total: BTreeMap<(String, String, String), u64>,
    /// Request latencies in milliseconds, insertion order.
    request_durations_ms: Vec<f64>,
    /// Keyed by "success" / "failed".
    registrations_total: BTreeMap<&'static str, u64>,
    /// Keyed by the closed reason vocabulary.
    validation_failures: BTreeMap<&'static str, u64>,
    /// Keyed by the closed error-type vocabulary.
    errors_total: BTreeMap<&'static str, u64>,
    active_connections: i64,
}

/// Thread-safe aggregator for one service's operational metrics.
///
/// Constructed once in the composition root and passed to request handlers;
/// a test harness builds a fresh instance per test. Writers take the lock
/// exclusively; [`MetricsAggregator::snapshot`] takes it shared.
///
/// Nothing here ever stores request content: only methods, normalised paths,
/// status classes, and closed-vocabulary reason strings.
pub struct MetricsAggregator {
    service: &'static str,
    inner: RwLock<Inner>,
}

impl MetricsAggregator {
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Service identifier stamped on every exported point.
    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Record a completed HTTP request.
    pub fn increment_request(&self, method: &str, path: &str, status: u16) {
        let key = (
            method.to_string(),
            normalize_path(path),
            status_class(status),
        );
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        *inner.requests_total.entry(key).or_insert(0) += 1;
    }

    /// Record a request latency sample.
    pub fn record_duration_ms(&self, duration_ms: f64) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        if inner.request_durations_ms.len() >= MAX_DURATION_SAMPLES {
            inner.request_durations_ms.drain(..MAX_DURATION_SAMPLES / 2);
        }
        inner.request_durations_ms.push(duration_ms);
    }

    /// Record the outcome of a registration attempt.
    pub fn increment_registration(&self, success: bool) {
        let key = if success { "success" } else { "failed" };
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        *inner.registrations_total.entry(key).or_insert(0) += 1;
    }

    /// Record an input-validation failure by reason class.
    pub fn increment_validation_failure(&self, reason: ValidationFailure) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        *inner
            .validation_failures
            .entry(reason.reason_label())
            .or_insert(0) += 1;
    }

    /// Record an error occurrence. The description is squashed through the
    /// closed error-type vocabulary before use as a label.
    pub fn increment_error(&self, error: &str) {
        let class = classify_error_type(error);
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        *inner.errors_total.entry(class).or_insert(0) += 1;
    }

    /// Adjust the active-connection gauge. The gauge never goes negative,
    /// even if a decrement races a reset.
    pub fn update_active_connections(&self, delta: i64) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        inner.active_connections = (inner.active_connections + delta).max(0);
    }

    /// Current value of the active-connection gauge.
    pub fn active_connections(&self) -> i64 {
        self.inner.read().expect("metrics lock poisoned").active_connections
    }

    /// Export an immutable snapshot of all metrics, stamped with the current
    /// unix time. The returned points hold no references into the
    /// aggregator, so they are safe to serialise after the lock is released.
    ///
    /// Quantiles are computed by sorting the bounded sample and indexing
    /// `floor(N * q)` -- approximate by design, which is acceptable for
    /// dashboard signals.
    pub fn snapshot(&self) -> Vec<Metric> {
        let inner = self.inner.read().expect("metrics lock poisoned");
        let timestamp = Utc::now().timestamp();
        let mut out = Vec::new();

        for ((method, path, status), count) in &inner.requests_total {
            out.push(self.point(
                timestamp,
                "requests_total",
                *count as f64,
                [
                    ("method", method.as_str()),
                    ("path", path.as_str()),
                    ("status", status.as_str()),
                ],
                MetricType::Counter,
            ));
        }

        if !inner.request_durations_ms.is_empty() {
            let mut sorted = inner.request_durations_ms.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).expect("latency samples are finite"));
            for (q, label) in [(0.50, "0.5"), (0.95, "0.95"), (0.99, "0.99")] {
                let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
                out.push(self.point(
                    timestamp,
                    "request_duration_milliseconds",
                    sorted[idx],
                    [("quantile", label)],
                    MetricType::Gauge,
                ));
            }
        }

        for (result, count) in &inner.registrations_total {
            out.push(self.point(
                timestamp,
                "registrations_total",
                *count as f64,
                [("result", *result)],
                MetricType::Counter,
            ));
        }

        for (reason, count) in &inner.validation_failures {
            out.push(self.point(
                timestamp,
                "validation_failures_total",
                *count as f64,
                [("reason", *reason)],
                MetricType::Counter,
            ));
        }

        out.push(self.point(
            timestamp,
            "connections_active",
            inner.active_connections as f64,
            std::iter::empty::<(&str, &str)>(),
            MetricType::Gauge,
        ));

        for (error_type, count) in &inner.errors_total {
            out.push(self.point(
                timestamp,
                "errors_total",
                *count as f64,
                [("type", *error_type)],
                MetricType::Counter,
            ));
        }

        out
    }

    fn point<'a>(
        &self,
        timestamp: i64,
        name: &str,
        value: f64,
        labels: impl IntoIterator<Item = (&'a str, &'a str)>,
        metric_type: MetricType,
    ) -> Metric {
        Metric {
            service: self.service.to_string(),
            timestamp,
            name: name.to_string(),
            value,
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            metric_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(snapshot: &'a [Metric], name: &str, label: (&str, &str)) -> Option<&'a Metric> {
        snapshot.iter().find(|m| {
            m.name == name && m.labels.get(label.0).map(String::as_str) == Some(label.1)
        })
    }

    #[test]
    fn request_counter_grows_by_one() {
        let agg = MetricsAggregator::new("entry-hub");
        agg.increment_request("POST", "/api/register", 201);

        let snap = agg.snapshot();
        let m = find(&snap, "requests_total", ("path", "/api/register")).unwrap();
        assert_eq!(m.value, 1.0);
        assert_eq!(m.labels["method"], "POST");
        assert_eq!(m.labels["status"], "2xx");

        agg.increment_request("POST", "/api/register", 201);
        let snap = agg.snapshot();
        let m = find(&snap, "requests_total", ("path", "/api/register")).unwrap();
        assert_eq!(m.value, 2.0);
    }

    #[test]
    fn paths_are_normalized_before_use_as_labels() {
        let agg = MetricsAggregator::new("entry-hub");
        agg.increment_request("GET", "/users/111", 200);
        agg.increment_request("GET", "/users/222", 200);

        let snap = agg.snapshot();
        let m = find(&snap, "requests_total", ("path", "/users/{id}")).unwrap();
        assert_eq!(m.value, 2.0);
    }

    #[test]
    fn quantiles_are_non_decreasing() {
        let agg = MetricsAggregator::new("entry-hub");
        // Insert in a hostile order.
        for v in [900.0, 2.0, 500.0, 1.0, 100.0, 3.0, 250.0, 4.0, 5.0, 6.0] {
            agg.record_duration_ms(v);
        }
        let snap = agg.snapshot();
        let p50 = find(&snap, "request_duration_milliseconds", ("quantile", "0.5"))
            .unwrap()
            .value;
        let p95 = find(&snap, "request_duration_milliseconds", ("quantile", "0.95"))
            .unwrap()
            .value;
        let p99 = find(&snap, "request_duration_milliseconds", ("quantile", "0.99"))
            .unwrap()
            .value;
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn duration_buffer_is_bounded() {
        let agg = MetricsAggregator::new("entry-hub");
        for i in 0..(MAX_DURATION_SAMPLES + 100) {
            agg.record_duration_ms(i as f64);
        }
        let len = agg.inner.read().unwrap().request_durations_ms.len();
        assert!(len <= MAX_DURATION_SAMPLES);
        // Oldest half was dropped; newest sample survives.
        let newest = *agg
            .inner
            .read()
            .unwrap()
            .request_durations_ms
            .last()
            .unwrap();
        assert_eq!(newest, (MAX_DURATION_SAMPLES + 99) as f64);
    }

    #[test]
    fn active_connections_never_negative() {
        let agg = MetricsAggregator::new("entry-hub");
        agg.update_active_connections(1);
        agg.update_active_connections(-1);
        agg.update_active_connections(-1);
        assert_eq!(agg.active_connections(), 0);
    }

    #[test]
    fn validation_failures_use_reason_labels() {
        let agg = MetricsAggregator::new("entry-hub");
        agg.increment_validation_failure(ValidationFailure::WeakPassword);
        let snap = agg.snapshot();
        let m = find(&snap, "validation_failures_total", ("reason", "weak_password")).unwrap();
        assert_eq!(m.value, 1.0);
    }

    #[test]
    fn errors_are_classified() {
        let agg = MetricsAggregator::new("entry-hub");
        agg.increment_error("upstream connect timeout after 30s");
        agg.increment_error("some weird library panic message");
        let snap = agg.snapshot();
        assert!(find(&snap, "errors_total", ("type", "timeout")).is_some());
        assert!(find(&snap, "errors_total", ("type", "internal")).is_some());
    }

    #[test]
    fn snapshot_points_carry_service_and_timestamp() {
        let agg = MetricsAggregator::new("security-switch");
        agg.increment_registration(true);
        let snap = agg.snapshot();
        assert!(!snap.is_empty());
        for m in &snap {
            assert_eq!(m.service, "security-switch");
            assert!(m.timestamp > 0);
        }
    }
}
