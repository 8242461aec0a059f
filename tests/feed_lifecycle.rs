// tests/feed_lifecycle.rs
//
// Engine + stream subscriber driven through the scripted channel transport.
// The tokio clock is paused, so reconnect periods and connect timeouts elapse
// instantly but in order.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast::Receiver;
use tokio::time::{timeout, Instant};

use telemetry_engine::feed::{channel, ConnectOutcome, ReconnectPolicy};
use telemetry_engine::{ConnectionState, Engine, EngineEvent, EngineOptions, TimeWindow};

use ConnectionState::{Connected, Connecting, Disconnected};

fn opts(reconnect_ms: u64, connect_timeout_ms: u64) -> EngineOptions {
    EngineOptions {
        capacity: 1000,
        backfill_limit: 1000,
        reconnect: ReconnectPolicy {
            reconnect_period: Duration::from_millis(reconnect_ms),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        },
        shutdown_timeout: Duration::from_millis(500),
    }
}

async fn next_matching<F>(rx: &mut Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    timeout(Duration::from_secs(600), async {
        loop {
            let ev = rx.recv().await.expect("event channel open");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

async fn next_transition(rx: &mut Receiver<EngineEvent>) -> (ConnectionState, ConnectionState) {
    match next_matching(rx, |e| matches!(e, EngineEvent::StateChanged { .. })).await {
        EngineEvent::StateChanged { from, to, .. } => (from, to),
        _ => unreachable!(),
    }
}

fn payload(temp: f64) -> serde_json::Value {
    json!({"temperature": temp, "humidity": 48.5, "timestamp": Utc::now().to_rfc3339()})
}

#[tokio::test(start_paused = true)]
async fn malformed_message_is_dropped_without_touching_connection() {
    let (feed, transport) = channel();
    let engine = Engine::start(opts(5_000, 30_000), Box::new(transport), None);
    let mut rx = engine.events();

    assert_eq!(next_transition(&mut rx).await, (Connecting, Connected));

    feed.publish_json(&payload(22.5));
    next_matching(&mut rx, |e| matches!(e, EngineEvent::ReadingIngested { .. })).await;
    let before = engine.status().total_stored;

    feed.publish("{temperature: oops");
    next_matching(&mut rx, |e| matches!(e, EngineEvent::MessageError { .. })).await;

    let st = engine.status();
    assert_eq!(before, 1);
    assert_eq!(st.total_stored, 1);
    assert_eq!(st.connection, Connected);
    assert!(st.last_error.as_deref().unwrap().starts_with("message error"));
    assert!(st.last_update.is_some());
    assert_eq!(feed.connect_attempts(), 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_then_reconnect_after_backoff() {
    let (feed, transport) = channel();
    let engine = Engine::start(opts(5_000, 30_000), Box::new(transport), None);
    let mut rx = engine.events();

    assert_eq!(next_transition(&mut rx).await, (Connecting, Connected));

    let dropped_at = Instant::now();
    feed.drop_connection("broker restart");

    assert_eq!(next_transition(&mut rx).await, (Connected, Disconnected));
    assert_eq!(next_transition(&mut rx).await, (Disconnected, Connecting));
    assert!(dropped_at.elapsed() >= Duration::from_millis(5_000));
    assert_eq!(next_transition(&mut rx).await, (Connecting, Connected));

    assert_eq!(feed.connect_attempts(), 2);
    let err = engine.status().last_error.unwrap();
    assert!(err.contains("broker restart"), "{err}");

    // Messages keep flowing on the new session.
    feed.publish_json(&payload(19.0));
    next_matching(&mut rx, |e| matches!(e, EngineEvent::ReadingIngested { .. })).await;
    assert_eq!(engine.status().total_stored, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_and_hung_connects_retry_until_success() {
    let (feed, transport) = channel();
    feed.script_connects([
        ConnectOutcome::Refuse("not authorized".into()),
        ConnectOutcome::Hang,
    ]);
    let engine = Engine::start(opts(1_000, 10_000), Box::new(transport), None);
    let mut rx = engine.events();
    let started = Instant::now();

    // Attempt 1: refused.
    assert_eq!(next_transition(&mut rx).await, (Connecting, Disconnected));
    assert!(engine
        .status()
        .last_error
        .unwrap()
        .contains("not authorized"));

    // Attempt 2: hangs until the connect timeout.
    assert_eq!(next_transition(&mut rx).await, (Disconnected, Connecting));
    assert_eq!(next_transition(&mut rx).await, (Connecting, Disconnected));
    assert!(engine.status().last_error.unwrap().contains("timed out"));
    assert!(started.elapsed() >= Duration::from_millis(11_000));

    // Attempt 3: accepted.
    assert_eq!(next_transition(&mut rx).await, (Disconnected, Connecting));
    assert_eq!(next_transition(&mut rx).await, (Connecting, Connected));
    assert_eq!(feed.connect_attempts(), 3);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_forces_a_hung_connect_closed() {
    let (feed, transport) = channel();
    feed.script_connects([ConnectOutcome::Hang]);
    let engine = Engine::start(opts(5_000, 3_600_000), Box::new(transport), None);

    // Let the subscriber reach the hanging connect.
    for _ in 0..10 {
        if feed.connect_attempts() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(feed.connect_attempts(), 1);

    let began = Instant::now();
    engine.shutdown().await;
    assert!(began.elapsed() < Duration::from_millis(500));
    assert_eq!(feed.close_count(), 1);

    // Idempotent.
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn readings_age_out_of_the_window_without_mutation() {
    let (feed, transport) = channel();
    let engine = Engine::start(opts(5_000, 30_000), Box::new(transport), None);
    let mut rx = engine.events();

    feed.publish_json(&payload(20.0));
    next_matching(&mut rx, |e| matches!(e, EngineEvent::ReadingIngested { .. })).await;

    let five: TimeWindow = "5m".parse().unwrap();
    let now = Utc::now();
    assert_eq!(engine.filtered_view_at(&five, now).len(), 1);
    assert!(engine
        .filtered_view_at(&five, now + chrono::Duration::minutes(6))
        .is_empty());
    assert_eq!(engine.filtered_view(&TimeWindow::all()).len(), 1);
    assert_eq!(engine.status().total_stored, 1);

    engine.shutdown().await;
}

// ---- backfill interplay ----

use std::sync::Arc;

use telemetry_engine::backfill::{HistoryStore, KeyedDocuments};
use telemetry_engine::error::LoadError;
use tokio::sync::Notify;

struct DownStore;

#[async_trait::async_trait]
impl HistoryStore for DownStore {
    async fn fetch_documents(&self, _limit: usize) -> Result<KeyedDocuments, LoadError> {
        Err(LoadError::Status(503))
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

/// Holds its answer until released, so live data lands first.
struct GatedStore {
    gate: Arc<Notify>,
    docs: KeyedDocuments,
}

#[async_trait::async_trait]
impl HistoryStore for GatedStore {
    async fn fetch_documents(&self, _limit: usize) -> Result<KeyedDocuments, LoadError> {
        self.gate.notified().await;
        Ok(self.docs.clone())
    }
    fn name(&self) -> &'static str {
        "gated"
    }
}

#[tokio::test(start_paused = true)]
async fn backfill_failure_keeps_the_live_feed_running() {
    let (feed, transport) = channel();
    let store: Arc<dyn HistoryStore> = Arc::new(DownStore);
    let engine = Engine::start(opts(5_000, 30_000), Box::new(transport), Some(store));
    let mut rx = engine.events();

    next_matching(&mut rx, |e| matches!(e, EngineEvent::BackfillFailed { .. })).await;
    let st = engine.status();
    assert!(st.last_error.as_deref().unwrap().starts_with("backfill:"));
    assert!(st.last_error.unwrap().contains("503"));

    feed.publish_json(&payload(21.0));
    next_matching(&mut rx, |e| matches!(e, EngineEvent::ReadingIngested { .. })).await;
    let st = engine.status();
    assert_eq!(st.connection, Connected);
    assert_eq!(st.total_stored, 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn late_backfill_merges_behind_live_readings() {
    let live_at = Utc::now();
    let docs: KeyedDocuments = (1..=3)
        .map(|i| {
            let ts = live_at - chrono::Duration::minutes(10 * i);
            (
                format!("-H{i}"),
                json!({"device_id": "ESP32-DHT11", "temperature": 10.0 + i as f64, "humidity": 30.0, "timestamp": ts.to_rfc3339()}),
            )
        })
        .collect();

    let gate = Arc::new(Notify::new());
    let store: Arc<dyn HistoryStore> = Arc::new(GatedStore {
        gate: Arc::clone(&gate),
        docs,
    });
    let (feed, transport) = channel();
    let engine = Engine::start(opts(5_000, 30_000), Box::new(transport), Some(store));
    let mut rx = engine.events();

    feed.publish_json(&json!({"temperature": 25.0, "humidity": 50.0, "timestamp": live_at.to_rfc3339()}));
    next_matching(&mut rx, |e| matches!(e, EngineEvent::ReadingIngested { .. })).await;
    assert_eq!(engine.status().total_stored, 1);

    gate.notify_one();
    match next_matching(&mut rx, |e| matches!(e, EngineEvent::BackfillCompleted { .. })).await {
        EngineEvent::BackfillCompleted { loaded, rejected } => {
            assert_eq!((loaded, rejected), (3, 0));
        }
        _ => unreachable!(),
    }

    let all = engine.filtered_view(&TimeWindow::all());
    let temps: Vec<f64> = all.iter().map(|r| r.temperature()).collect();
    assert_eq!(temps, vec![13.0, 12.0, 11.0, 25.0]);
    assert!(engine.status().last_error.is_none());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_pending_backfill() {
    let gate = Arc::new(Notify::new());
    let store: Arc<dyn HistoryStore> = Arc::new(GatedStore {
        gate,
        docs: Vec::new(),
    });
    let (_feed, transport) = channel();
    let engine = Engine::start(opts(5_000, 30_000), Box::new(transport), Some(store));
    tokio::task::yield_now().await;

    let began = Instant::now();
    engine.shutdown().await;
    assert!(began.elapsed() < Duration::from_millis(500));
    assert_eq!(engine.status().total_stored, 0);
}
