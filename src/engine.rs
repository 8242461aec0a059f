//! # Engine
//! Owns the reading buffer, runs the two feeders against it (one-shot
//! backfill, long-lived stream subscriber) and answers queries from the
//! current in-memory snapshot.
//!
//! Nothing on the query surface touches the network. Filtered views and stats
//! are recomputed per call because window membership depends on `now`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::backfill::{self, FirebaseStore, HistoryStore};
use crate::buffer::ReadingBuffer;
use crate::config::EngineConfig;
use crate::feed::{FeedTransport, MqttTransport, ReconnectPolicy, StreamSubscriber};
use crate::reading::Reading;
use crate::stats::{summarize, StatsSummary};
use crate::status::{EngineEvent, EngineStatus, StatusBoard};
use crate::window::TimeWindow;

/// Runtime knobs, usually derived from `EngineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub capacity: usize,
    pub backfill_limit: usize,
    pub reconnect: ReconnectPolicy,
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            capacity: cfg.buffer.capacity,
            backfill_limit: cfg.backfill_limit(),
            reconnect: cfg.feed.reconnect_policy(),
            shutdown_timeout: cfg.shutdown_timeout(),
        }
    }
}

pub struct Engine {
    buffer: Arc<ReadingBuffer>,
    status: Arc<StatusBoard>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown_timeout: Duration,
}

impl Engine {
    /// Spawn the feeders on the current tokio runtime and return immediately.
    /// The backfill (if any) runs concurrently with the first connect attempts.
    pub fn start(
        opts: EngineOptions,
        transport: Box<dyn FeedTransport>,
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Self {
        let buffer = Arc::new(ReadingBuffer::with_capacity(opts.capacity));
        let status = Arc::new(StatusBoard::new());
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        if let Some(store) = history {
            let fut = run_backfill(
                store,
                opts.backfill_limit,
                Arc::clone(&buffer),
                Arc::clone(&status),
                cancel.child_token(),
            );
            tasks.push(("backfill", tokio::spawn(fut)));
        }

        let subscriber = StreamSubscriber::new(
            transport,
            opts.reconnect,
            Arc::clone(&buffer),
            Arc::clone(&status),
        );
        tasks.push(("subscriber", tokio::spawn(subscriber.run(cancel.child_token()))));

        tracing::info!(
            target: "engine",
            capacity = buffer.capacity(),
            backfill_limit = opts.backfill_limit,
            reconnect_ms = opts.reconnect.reconnect_period.as_millis() as u64,
            "engine started"
        );

        Self {
            buffer,
            status,
            cancel,
            tasks: Mutex::new(tasks),
            shutdown_timeout: opts.shutdown_timeout,
        }
    }

    /// Production wiring: MQTT live feed plus Firebase backfill when configured.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self> {
        let transport = MqttTransport::from_config(&cfg.feed).context("live feed config")?;
        let history: Option<Arc<dyn HistoryStore>> = if cfg.backfill.is_active() {
            let store = FirebaseStore::from_config(&cfg.backfill).context("backfill config")?;
            Some(Arc::new(store))
        } else {
            tracing::info!(target: "engine", "backfill disabled");
            None
        };
        Ok(Self::start(cfg.into(), Box::new(transport), history))
    }

    /// Buffer contents inside `window`, evaluated against the wall clock.
    pub fn filtered_view(&self, window: &TimeWindow) -> Vec<Reading> {
        self.filtered_view_at(window, Utc::now())
    }

    /// Same as `filtered_view` with an explicit `now`.
    pub fn filtered_view_at(&self, window: &TimeWindow, now: DateTime<Utc>) -> Vec<Reading> {
        window.apply(&self.buffer.snapshot(), now)
    }

    pub fn stats(readings: &[Reading]) -> StatsSummary {
        summarize(readings)
    }

    pub fn status(&self) -> EngineStatus {
        self.status.snapshot(self.buffer.size())
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.status.subscribe()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Cancel both feeders and wait for them, at most `shutdown_timeout`
    /// each. Stragglers are aborted. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, mut handle) in tasks {
            match timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(target: "engine", task = name, "task stopped"),
                Ok(Err(e)) => tracing::warn!(target: "engine", task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    tracing::warn!(target: "engine", task = name, "task did not stop in time; aborting");
                    handle.abort();
                }
            }
        }
        tracing::info!(target: "engine", "engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_backfill(
    store: Arc<dyn HistoryStore>,
    limit: usize,
    buffer: Arc<ReadingBuffer>,
    status: Arc<StatusBoard>,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(target: "backfill", "backfill cancelled");
            return;
        }
        res = backfill::load(store.as_ref(), limit) => res,
    };

    match outcome {
        Ok((readings, report)) => {
            let evicted = buffer.insert(readings);
            gauge!("buffer_readings").set(buffer.size() as f64);
            tracing::info!(
                target: "backfill",
                loaded = report.loaded,
                evicted,
                stored = buffer.size(),
                "history merged"
            );
            status.record_backfill(Ok((report.loaded, report.rejected)));
        }
        Err(e) => {
            tracing::warn!(
                target: "backfill",
                store = store.name(),
                error = %e,
                "history unavailable; continuing with live feed only"
            );
            status.record_backfill(Err(e.to_string()));
        }
    }
}
