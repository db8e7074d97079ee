//! TimescaleDB time-series store.
//!
//! Append-only: rows are only ever removed by the retention policy. The
//! collector declares the operational policies (hypertable partitioning,
//! retention, compression, continuous aggregates) at startup; the storage
//! engine runs them.

mod schema;

use crate::stats::CollectorStats;
use chrono::{DateTime, TimeZone, Utc};
use keywarden_core::metrics::Metric;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A recent row as served to the exposition endpoint.
#[derive(Debug, sqlx::FromRow)]
pub struct RecentMetric {
    pub service: String,
    pub metric_name: String,
    pub metric_type: String,
    pub value: f64,
    pub labels: sqlx::types::Json<std::collections::BTreeMap<String, String>>,
}

/// Maximum attempts for one insert.
const MAX_INSERT_ATTEMPTS: u32 = 3;
/// Linear backoff unit: attempt N sleeps N * 100 ms.
const RETRY_BACKOFF_UNIT: Duration = Duration::from_millis(100);
/// Transaction deadline for a single-row insert.
const INSERT_DEADLINE: Duration = Duration::from_secs(5);

const INSERT_METRIC: &str = "
    INSERT INTO metrics (time, service, metric_name, metric_type, value, labels, inserted_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)";

const INSERT_VALIDATION_ERROR: &str = "
    INSERT INTO validation_errors (time, service, reason) VALUES (NOW(), $1, $2)";

const SELECT_RECENT_METRICS: &str = "
    SELECT service, metric_name, metric_type, value, labels
    FROM metrics
    WHERE time > NOW() - INTERVAL '5 minutes'
    ORDER BY metric_name, service
    LIMIT 5000";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metrics database unavailable")]
    Unavailable,

    #[error("metric insert failed")]
    Insert,

    #[error("schema declaration failed: {0}")]
    Schema(String),
}

/// Retryability is decided from structured SQLSTATE codes and transport
/// error kinds, never from message text. Retryable: connection-class
/// failures (08xxx), serialisation failures and deadlocks (40001, 40P01),
/// lock timeouts (55P03), statement cancellation (57014), and connection
/// slots exhausted (53300). Constraint and syntax errors fail immediately.
fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => {
                code.starts_with("08")
                    || code == "40001"
                    || code == "40P01"
                    || code == "55P03"
                    || code == "57014"
                    || code == "53300"
            }
            None => false,
        },
        _ => false,
    }
}

pub struct MetricsStore {
    pool: PgPool,
    stats: Arc<CollectorStats>,
}

impl MetricsStore {
    pub async fn connect(
        database_url: &str,
        stats: Arc<CollectorStats>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .max_lifetime(Duration::from_secs(30 * 60))
            .idle_timeout(Duration::from_secs(5 * 60))
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    use sqlx::Executor;
                    conn.execute("SET statement_timeout = '5s'").await?;
                    conn.execute("SET lock_timeout = '10s'").await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to connect to metrics database");
                StoreError::Unavailable
            })?;

        info!("metrics store connected");
        Ok(Self { pool, stats })
    }

    /// Build a store without touching the database; connections are opened
    /// on first use. Lets tests exercise the degraded paths with nothing
    /// listening.
    #[allow(dead_code)]
    pub fn connect_lazy(
        database_url: &str,
        stats: Arc<CollectorStats>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy(database_url)
            .map_err(|e| {
                error!(error = %e, "invalid metrics database URL");
                StoreError::Unavailable
            })?;
        Ok(Self { pool, stats })
    }

    /// Declare the hypertable, side tables, and operational policies.
    /// Every statement is idempotent, so restarts are harmless.
    pub async fn declare_policies(&self) -> Result<(), StoreError> {
        for statement in schema::DECLARATIONS {
            use sqlx::Executor;
            self.pool.execute(*statement).await.map_err(|e| {
                error!(error = %e, "policy declaration failed");
                StoreError::Schema(e.to_string())
            })?;
        }
        info!("time-series policies declared");
        Ok(())
    }

    /// Persist one metric: single-row parameterised insert inside a
    /// transaction with a 5-second deadline, retried up to 3 times with
    /// linear backoff for the retryable error class only.
    pub async fn store_metric(&self, metric: &Metric) -> Result<(), StoreError> {
        for attempt in 1..=MAX_INSERT_ATTEMPTS {
            match tokio::time::timeout(INSERT_DEADLINE, self.insert_once(metric)).await {
                Ok(Ok(())) => {
                    self.stats.record_stored();
                    debug!(service = %metric.service, name = %metric.name, "metric stored");
                    return Ok(());
                }
                Ok(Err(e)) if is_retryable(&e) && attempt < MAX_INSERT_ATTEMPTS => {
                    let backoff = RETRY_BACKOFF_UNIT * attempt;
                    warn!(error = %e, attempt, "retrying metric insert");
                    tokio::time::sleep(backoff).await;
                }
                Ok(Err(e)) => {
                    error!(error = %e, attempt, "metric insert failed");
                    self.stats.record_failure();
                    return Err(StoreError::Insert);
                }
                Err(_) if attempt < MAX_INSERT_ATTEMPTS => {
                    warn!(attempt, "metric insert transaction deadline exceeded, retrying");
                    tokio::time::sleep(RETRY_BACKOFF_UNIT * attempt).await;
                }
                Err(_) => {
                    error!("metric insert timed out on final attempt");
                    self.stats.record_failure();
                    return Err(StoreError::Insert);
                }
            }
        }
        unreachable!("loop returns on final attempt");
    }

    async fn insert_once(&self, metric: &Metric) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        bind_metric(sqlx::query(INSERT_METRIC), metric)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    /// Persist a batch in one all-or-nothing transaction.
    pub async fn store_batch(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        if metrics.is_empty() {
            return Ok(());
        }
        let result: Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            for metric in metrics {
                bind_metric(sqlx::query(INSERT_METRIC), metric)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => {
                self.stats.record_stored_batch(metrics.len() as u64);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, count = metrics.len(), "batch insert failed");
                self.stats.record_failure();
                Err(StoreError::Insert)
            }
        }
    }

    /// Best-effort record of a rejected metric for the 7-day validation
    /// error table. Failures here only get a debug line; rejection already
    /// incremented the counter.
    pub async fn record_validation_error(&self, service: &str, reason: &str) {
        if let Err(e) = sqlx::query(INSERT_VALIDATION_ERROR)
            .bind(service)
            .bind(reason)
            .execute(&self.pool)
            .await
        {
            debug!(error = %e, "could not record validation error");
        }
    }

    /// Rows from the last five minutes, for the exposition endpoint.
    pub async fn recent_metrics(&self) -> Result<Vec<RecentMetric>, StoreError> {
        sqlx::query_as(SELECT_RECENT_METRICS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to load recent metrics");
                StoreError::Unavailable
            })
    }

    /// Connectivity probe for the admin health endpoint.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!(error = %e, "metrics store health check failed");
                StoreError::Unavailable
            })
    }
}

fn bind_metric<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    metric: &'q Metric,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let time: DateTime<Utc> = Utc
        .timestamp_opt(metric.timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let labels = serde_json::to_value(&metric.labels).unwrap_or_default();
    query
        .bind(time)
        .bind(&metric.service)
        .bind(&metric.name)
        .bind(metric_type_str(metric))
        .bind(metric.value)
        .bind(labels)
        .bind(Utc::now())
}

fn metric_type_str(metric: &Metric) -> &'static str {
    use keywarden_core::metrics::MetricType;
    match metric.metric_type {
        MetricType::Counter => "counter",
        MetricType::Gauge => "gauge",
        MetricType::Histogram => "histogram",
        MetricType::Summary => "summary",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_error(kind: std::io::ErrorKind) -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(kind, "test"))
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(is_retryable(&io_error(std::io::ErrorKind::ConnectionRefused)));
        assert!(is_retryable(&io_error(std::io::ErrorKind::ConnectionReset)));
        assert!(is_retryable(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn decode_errors_are_terminal() {
        assert!(!is_retryable(&sqlx::Error::RowNotFound));
        assert!(!is_retryable(&sqlx::Error::ColumnNotFound("x".to_string())));
    }

    #[test]
    fn backoff_is_linear_in_attempt() {
        assert_eq!(RETRY_BACKOFF_UNIT * 1, Duration::from_millis(100));
        assert_eq!(RETRY_BACKOFF_UNIT * 2, Duration::from_millis(200));
        assert_eq!(RETRY_BACKOFF_UNIT * 3, Duration::from_millis(300));
    }
}
