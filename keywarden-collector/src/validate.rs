//! Zero-knowledge validation of incoming metrics.
//!
//! Everything a service publishes is untrusted until it passes these checks.
//! The metric type itself needs no separate check here: deserialisation into
//! the closed [`MetricType`] enum already rejects unknown types.

use keywarden_core::metrics::{
    Metric, MAX_LABELS_PER_METRIC, MAX_LABEL_KEY_LENGTH, MAX_LABEL_VALUE_LENGTH,
    MAX_METRIC_NAME_LENGTH,
};

/// Label keys that can never appear on a metric, matched case-insensitively
/// as substrings of every label key.
const FORBIDDEN_LABEL_KEYS: &[&str] = &[
    "email",
    "password",
    "ssh_key",
    "email_hash",
    "user_id",
    "username",
];

/// How far into the future a metric timestamp may sit, allowing for clock
/// skew between publisher and collector.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 60;

/// Why a metric was rejected. The stable string feeds both the log line and
/// the validation-errors side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ServiceMismatch,
    ForbiddenLabelKey,
    SuspiciousLabelValue,
    InvalidName,
    TooManyLabels,
    LabelKeyTooLong,
    LabelValueTooLong,
    InvalidTimestamp,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceMismatch => "service_mismatch",
            Self::ForbiddenLabelKey => "forbidden_label_key",
            Self::SuspiciousLabelValue => "suspicious_label_value",
            Self::InvalidName => "invalid_name",
            Self::TooManyLabels => "too_many_labels",
            Self::LabelKeyTooLong => "label_key_too_long",
            Self::LabelValueTooLong => "label_value_too_long",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run the full validation pipeline over a deserialised metric.
///
/// `topic_service` is the second segment of the MQTT topic the message
/// arrived on; `now` is the collector's current unix time.
pub fn validate_metric(
    metric: &Metric,
    topic_service: &str,
    now: i64,
) -> Result<(), RejectReason> {
    // Topic/payload identity match: a publisher may only speak for itself.
    if metric.service != topic_service {
        return Err(RejectReason::ServiceMismatch);
    }

    // Zero-knowledge label checks.
    for (key, value) in &metric.labels {
        let key_lower = key.to_lowercase();
        if FORBIDDEN_LABEL_KEYS
            .iter()
            .any(|forbidden| key_lower.contains(forbidden))
        {
            return Err(RejectReason::ForbiddenLabelKey);
        }

        let value_lower = value.to_lowercase();
        if value_lower.contains('@') && value_lower.contains('.') {
            return Err(RejectReason::SuspiciousLabelValue);
        }
        if value_lower.starts_with("ssh-") {
            return Err(RejectReason::SuspiciousLabelValue);
        }
    }

    // Shape limits.
    if metric.name.is_empty() || metric.name.len() > MAX_METRIC_NAME_LENGTH {
        return Err(RejectReason::InvalidName);
    }
    if metric.labels.len() > MAX_LABELS_PER_METRIC {
        return Err(RejectReason::TooManyLabels);
    }
    for (key, value) in &metric.labels {
        if key.len() > MAX_LABEL_KEY_LENGTH {
            return Err(RejectReason::LabelKeyTooLong);
        }
        if value.len() > MAX_LABEL_VALUE_LENGTH {
            return Err(RejectReason::LabelValueTooLong);
        }
    }

    // Timestamp sanity: positive and at most slightly in the future.
    if metric.timestamp <= 0 || metric.timestamp > now + MAX_TIMESTAMP_SKEW_SECS {
        return Err(RejectReason::InvalidTimestamp);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keywarden_core::metrics::MetricType;
    use std::collections::BTreeMap;

    const NOW: i64 = 1_700_000_000;

    fn metric(labels: &[(&str, &str)]) -> Metric {
        Metric {
            service: "entry-hub".to_string(),
            timestamp: NOW,
            name: "requests_total".to_string(),
            value: 1.0,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            metric_type: MetricType::Counter,
        }
    }

    #[test]
    fn accepts_clean_metric() {
        let m = metric(&[("method", "POST"), ("status", "2xx")]);
        assert!(validate_metric(&m, "entry-hub", NOW).is_ok());
    }

    #[test]
    fn rejects_service_mismatch() {
        let m = metric(&[]);
        assert_eq!(
            validate_metric(&m, "security-switch", NOW),
            Err(RejectReason::ServiceMismatch)
        );
    }

    #[test]
    fn rejects_forbidden_label_keys_case_insensitively() {
        for key in ["email", "EMAIL", "user_email", "Password", "ssh_key", "username"] {
            let m = metric(&[(key, "x")]);
            assert_eq!(
                validate_metric(&m, "entry-hub", NOW),
                Err(RejectReason::ForbiddenLabelKey),
                "key {key} should be forbidden"
            );
        }
    }

    #[test]
    fn rejects_email_looking_values() {
        let m = metric(&[("note", "a@b.c")]);
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::SuspiciousLabelValue)
        );
    }

    #[test]
    fn rejects_ssh_key_looking_values() {
        let m = metric(&[("note", "ssh-ed25519 AAAA")]);
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::SuspiciousLabelValue)
        );
    }

    #[test]
    fn rejects_shape_violations() {
        let mut m = metric(&[]);
        m.name = String::new();
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::InvalidName)
        );

        let mut m = metric(&[]);
        m.name = "n".repeat(MAX_METRIC_NAME_LENGTH + 1);
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::InvalidName)
        );

        let labels: Vec<(String, String)> = (0..MAX_LABELS_PER_METRIC + 1)
            .map(|i| (format!("k{i}"), "v".to_string()))
            .collect();
        let mut m = metric(&[]);
        m.labels = labels.into_iter().collect();
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::TooManyLabels)
        );

        let m = metric(&[("k".repeat(MAX_LABEL_KEY_LENGTH + 1).as_str(), "v")]);
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::LabelKeyTooLong)
        );

        let m = metric(&[("k", "v".repeat(MAX_LABEL_VALUE_LENGTH + 1).as_str())]);
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::LabelValueTooLong)
        );
    }

    #[test]
    fn rejects_bad_timestamps() {
        let mut m = metric(&[]);
        m.timestamp = 0;
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::InvalidTimestamp)
        );

        let mut m = metric(&[]);
        m.timestamp = NOW + MAX_TIMESTAMP_SKEW_SECS + 1;
        assert_eq!(
            validate_metric(&m, "entry-hub", NOW),
            Err(RejectReason::InvalidTimestamp)
        );

        // Exactly at the skew boundary is accepted.
        let mut m = metric(&[]);
        m.timestamp = NOW + MAX_TIMESTAMP_SKEW_SECS;
        assert!(validate_metric(&m, "entry-hub", NOW).is_ok());
    }
}
