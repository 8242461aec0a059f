//! Status board: the single outward status/error channel of the engine.
//!
//! Holds the connection state, last ingestion time and last error behind a
//! lock for `status()` polling, and fans every transition and error out on a
//! broadcast channel for callers that prefer to subscribe.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::feed::ConnectionState;

const EVENT_CAPACITY: usize = 256;

/// Point-in-time engine status as returned by `Engine::status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub connection: ConnectionState,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_stored: usize,
}

/// Everything observable that happens inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Utc>,
    },
    MessageError {
        error: String,
        at: DateTime<Utc>,
    },
    ConnectError {
        error: String,
        at: DateTime<Utc>,
    },
    ReadingIngested {
        observed_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    BackfillCompleted {
        loaded: usize,
        rejected: usize,
    },
    BackfillFailed {
        error: String,
    },
}

#[derive(Debug)]
struct Inner {
    connection: ConnectionState,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Debug)]
pub struct StatusBoard {
    inner: RwLock<Inner>,
    events: broadcast::Sender<EngineEvent>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                connection: ConnectionState::Connecting,
                last_update: None,
                last_error: None,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner.read().connection
    }

    /// Record a transition. Re-entering the current state is not an event.
    pub fn set_connection(&self, to: ConnectionState) {
        let from = {
            let mut g = self.inner.write();
            let from = g.connection;
            if from == to {
                return;
            }
            g.connection = to;
            from
        };
        tracing::info!(target: "feed", %from, %to, "connection state changed");
        self.emit(EngineEvent::StateChanged {
            from,
            to,
            at: Utc::now(),
        });
    }

    pub fn record_ingest(&self, observed_at: DateTime<Utc>) {
        let at = Utc::now();
        self.inner.write().last_update = Some(at);
        self.emit(EngineEvent::ReadingIngested { observed_at, at });
    }

    pub fn record_message_error(&self, error: String) {
        self.set_last_error(error.clone());
        self.emit(EngineEvent::MessageError {
            error,
            at: Utc::now(),
        });
    }

    pub fn record_connect_error(&self, error: String) {
        self.set_last_error(error.clone());
        self.emit(EngineEvent::ConnectError {
            error,
            at: Utc::now(),
        });
    }

    pub fn record_backfill(&self, outcome: Result<(usize, usize), String>) {
        match outcome {
            Ok((loaded, rejected)) => self.emit(EngineEvent::BackfillCompleted { loaded, rejected }),
            Err(error) => {
                self.set_last_error(format!("backfill: {error}"));
                self.emit(EngineEvent::BackfillFailed { error });
            }
        }
    }

    pub fn snapshot(&self, total_stored: usize) -> EngineStatus {
        let g = self.inner.read();
        EngineStatus {
            connection: g.connection,
            last_update: g.last_update,
            last_error: g.last_error.clone(),
            total_stored,
        }
    }

    fn set_last_error(&self, error: String) {
        self.inner.write().last_error = Some(error);
    }

    fn emit(&self, ev: EngineEvent) {
        // No receivers is fine; status() still has the latest values.
        let _ = self.events.send(ev);
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
