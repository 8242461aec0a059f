use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "feed_messages_total",
            "Live messages decoded and stored."
        );
        describe_counter!(
            "feed_message_errors_total",
            "Live messages dropped as malformed."
        );
        describe_counter!(
            "feed_connect_failures_total",
            "Failed or timed-out connect attempts."
        );
        describe_counter!(
            "feed_reconnects_total",
            "Reconnect attempts after a lost session."
        );
        describe_gauge!(
            "feed_last_ingest_ts",
            "Unix ts of the last successfully stored live reading."
        );
        describe_counter!(
            "backfill_documents_total",
            "Documents returned by the history store."
        );
        describe_counter!(
            "backfill_rejected_total",
            "History documents skipped as malformed."
        );
        describe_counter!(
            "backfill_failures_total",
            "History fetches that failed outright."
        );
        describe_gauge!("buffer_readings", "Readings currently held in the buffer.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn install(capacity: usize) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        ensure_metrics_described();
        // Static gauge with the configured capacity
        gauge!("buffer_capacity").set(capacity as f64);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
