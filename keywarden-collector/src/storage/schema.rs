//! Idempotent declarations for the time-series schema and its policies.
//!
//! Continuous-aggregate creation cannot run inside a transaction, so every
//! declaration is executed as its own statement, in order. The percentile
//! aggregates rely on the TimescaleDB toolkit extension.

pub const DECLARATIONS: &[&str] = &[
    // Raw points, partitioned on time with 1-day chunks.
    "CREATE TABLE IF NOT EXISTS metrics (
        time         TIMESTAMPTZ NOT NULL,
        service      TEXT NOT NULL,
        metric_name  TEXT NOT NULL,
        metric_type  TEXT NOT NULL,
        value        DOUBLE PRECISION NOT NULL,
        labels       JSONB NOT NULL DEFAULT '{}',
        inserted_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "SELECT create_hypertable('metrics', 'time',
        chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)",
    // Rejected-metric audit trail, short retention.
    "CREATE TABLE IF NOT EXISTS validation_errors (
        time     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        service  TEXT NOT NULL,
        reason   TEXT NOT NULL
    )",
    "SELECT create_hypertable('validation_errors', 'time',
        chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE)",
    // Retention: raw points 30 days, validation errors 7 days, dropped by
    // chunk.
    "SELECT add_retention_policy('metrics', INTERVAL '30 days', if_not_exists => TRUE)",
    "SELECT add_retention_policy('validation_errors', INTERVAL '7 days', if_not_exists => TRUE)",
    // Compression for chunks older than 7 days.
    "ALTER TABLE metrics SET (
        timescaledb.compress,
        timescaledb.compress_segmentby = 'service, metric_name'
    )",
    "SELECT add_compression_policy('metrics', INTERVAL '7 days', if_not_exists => TRUE)",
    // Hourly rollups per (service, metric_name, metric_type).
    "CREATE MATERIALIZED VIEW IF NOT EXISTS metrics_hourly
        WITH (timescaledb.continuous) AS
        SELECT
            time_bucket(INTERVAL '1 hour', time) AS bucket,
            service,
            metric_name,
            metric_type,
            COUNT(*)   AS sample_count,
            AVG(value) AS avg_value,
            MIN(value) AS min_value,
            MAX(value) AS max_value,
            percentile_agg(value) AS value_percentiles
        FROM metrics
        GROUP BY bucket, service, metric_name, metric_type
        WITH NO DATA",
    "SELECT add_continuous_aggregate_policy('metrics_hourly',
        start_offset => INTERVAL '3 hours',
        end_offset => INTERVAL '1 hour',
        schedule_interval => INTERVAL '1 hour',
        if_not_exists => TRUE)",
    // Daily rollups.
    "CREATE MATERIALIZED VIEW IF NOT EXISTS metrics_daily
        WITH (timescaledb.continuous) AS
        SELECT
            time_bucket(INTERVAL '1 day', time) AS bucket,
            service,
            metric_name,
            metric_type,
            COUNT(*)   AS sample_count,
            AVG(value) AS avg_value,
            MIN(value) AS min_value,
            MAX(value) AS max_value,
            percentile_agg(value) AS value_percentiles
        FROM metrics
        GROUP BY bucket, service, metric_name, metric_type
        WITH NO DATA",
    "SELECT add_continuous_aggregate_policy('metrics_daily',
        start_offset => INTERVAL '3 days',
        end_offset => INTERVAL '1 day',
        schedule_interval => INTERVAL '1 day',
        if_not_exists => TRUE)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hypertables_declared_before_their_policies() {
        let create_idx = DECLARATIONS
            .iter()
            .position(|s| s.contains("create_hypertable('metrics'"))
            .unwrap();
        let retention_idx = DECLARATIONS
            .iter()
            .position(|s| s.contains("add_retention_policy('metrics'"))
            .unwrap();
        let compression_idx = DECLARATIONS
            .iter()
            .position(|s| s.contains("add_compression_policy"))
            .unwrap();
        assert!(create_idx < retention_idx);
        assert!(create_idx < compression_idx);
    }

    #[test]
    fn rollup_views_cover_both_cadences() {
        assert!(DECLARATIONS.iter().any(|s| s.contains("metrics_hourly")));
        assert!(DECLARATIONS.iter().any(|s| s.contains("metrics_daily")));
        // Both rollups carry the percentile aggregate for p50/p95/p99.
        assert_eq!(
            DECLARATIONS
                .iter()
                .filter(|s| s.contains("percentile_agg"))
                .count(),
            2
        );
    }

    #[test]
    fn every_declaration_is_idempotent() {
        for statement in DECLARATIONS {
            let idempotent = statement.contains("IF NOT EXISTS")
                || statement.contains("if_not_exists => TRUE")
                || statement.starts_with("ALTER TABLE");
            assert!(idempotent, "not idempotent: {statement}");
        }
    }
}
