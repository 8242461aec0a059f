// src/feed/channel.rs
//! In-process feed transport driven from a `ChannelFeed` handle. Used by the
//! tests and handy for running the engine without a broker.
//!
//! Messages published while the session is down are queued and delivered once
//! the next session is up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{FeedEvent, FeedTransport};

/// How the next `connect()` call behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse(String),
    /// Never completes; exercises the connect timeout and forced close.
    Hang,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<VecDeque<ConnectOutcome>>,
    attempts: AtomicUsize,
    closes: AtomicUsize,
}

/// Producer side of a scripted feed.
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    tx: mpsc::UnboundedSender<FeedEvent>,
    shared: Arc<Shared>,
}

pub struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
    shared: Arc<Shared>,
}

/// Create a connected pair. Connects succeed unless scripted otherwise.
pub fn channel() -> (ChannelFeed, ChannelTransport) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        ChannelFeed {
            tx,
            shared: Arc::clone(&shared),
        },
        ChannelTransport { rx, shared },
    )
}

impl ChannelFeed {
    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        let _ = self.tx.send(FeedEvent::Message(payload.into()));
    }

    pub fn publish_json(&self, value: &serde_json::Value) {
        self.publish(value.to_string());
    }

    /// Simulate the broker dropping the session.
    pub fn drop_connection(&self, reason: impl Into<String>) {
        let _ = self.tx.send(FeedEvent::Disconnected(reason.into()));
    }

    /// Queue outcomes for the next `connect()` calls, in order.
    pub fn script_connects<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = ConnectOutcome>,
    {
        self.shared.script.lock().extend(outcomes);
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedTransport for ChannelTransport {
    async fn connect(&mut self) -> Result<()> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.shared.script.lock().pop_front();
        match next.unwrap_or(ConnectOutcome::Accept) {
            ConnectOutcome::Accept => Ok(()),
            ConnectOutcome::Refuse(reason) => bail!(reason),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }

    async fn next_event(&mut self) -> Result<FeedEvent> {
        Ok(self
            .rx
            .recv()
            .await
            .unwrap_or_else(|| FeedEvent::Disconnected("feed handle dropped".into())))
    }

    fn close(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
