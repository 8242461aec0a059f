// src/feed/subscriber.rs
//! Reconnect state machine for the live feed.
//!
//! ```text
//! Connecting --handshake+subscribe ok--> Connected
//! Connecting --error / timeout---------> Disconnected
//! Connected  --disconnect / error------> Disconnected
//! Disconnected --reconnect period------> Connecting
//! ```
//! Cancellation at any await point closes the session and returns.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::{ConnectionState, FeedEvent, FeedTransport, ReconnectPolicy};
use crate::buffer::ReadingBuffer;
use crate::metrics::ensure_metrics_described;
use crate::reading::Reading;
use crate::status::StatusBoard;

pub struct StreamSubscriber {
    transport: Box<dyn FeedTransport>,
    policy: ReconnectPolicy,
    buffer: Arc<ReadingBuffer>,
    status: Arc<StatusBoard>,
}

impl StreamSubscriber {
    pub fn new(
        transport: Box<dyn FeedTransport>,
        policy: ReconnectPolicy,
        buffer: Arc<ReadingBuffer>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            transport,
            policy,
            buffer,
            status,
        }
    }

    /// Run until `cancel` fires. Never returns on transport errors.
    pub async fn run(mut self, cancel: CancellationToken) {
        ensure_metrics_described();
        let name = self.transport.name();

        loop {
            if self.status.connection() == ConnectionState::Disconnected {
                counter!("feed_reconnects_total").increment(1);
            }
            self.status.set_connection(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = cancel.cancelled() => None,
                res = timeout(self.policy.connect_timeout, self.transport.connect()) => Some(res),
            };
            let Some(attempt) = attempt else {
                self.transport.close();
                return;
            };

            let lost = match attempt {
                Ok(Ok(())) => {
                    self.status.set_connection(ConnectionState::Connected);
                    tracing::info!(target: "feed", transport = name, "subscribed to live feed");
                    match self.pump(&cancel).await {
                        Some(reason) => format!("disconnected: {reason}"),
                        None => {
                            self.transport.close();
                            return;
                        }
                    }
                }
                Ok(Err(e)) => {
                    counter!("feed_connect_failures_total").increment(1);
                    format!("connect failed: {e:#}")
                }
                Err(_) => {
                    counter!("feed_connect_failures_total").increment(1);
                    format!(
                        "connect timed out after {} ms",
                        self.policy.connect_timeout.as_millis()
                    )
                }
            };

            self.transport.close();
            tracing::warn!(
                target: "feed",
                transport = name,
                error = %lost,
                retry_ms = self.policy.reconnect_period.as_millis() as u64,
                "live feed unavailable"
            );
            self.status.set_connection(ConnectionState::Disconnected);
            self.status.record_connect_error(lost);

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(self.policy.reconnect_period) => {}
            }
        }
    }

    /// Drain the established session. `Some(reason)` when it drops, `None`
    /// when cancelled.
    async fn pump(&mut self, cancel: &CancellationToken) -> Option<String> {
        loop {
            let ev = tokio::select! {
                _ = cancel.cancelled() => return None,
                ev = self.transport.next_event() => ev,
            };
            match ev {
                Ok(FeedEvent::Message(bytes)) => self.ingest(&bytes),
                Ok(FeedEvent::Disconnected(reason)) => return Some(reason),
                Err(e) => return Some(format!("{e:#}")),
            }
        }
    }

    /// Decode one message; malformed ones are reported and dropped.
    fn ingest(&self, bytes: &[u8]) {
        match Reading::from_payload(bytes) {
            Ok(reading) => {
                self.buffer.insert([reading]);
                self.status.record_ingest(reading.observed_at());

                counter!("feed_messages_total").increment(1);
                gauge!("buffer_readings").set(self.buffer.size() as f64);
                gauge!("feed_last_ingest_ts").set(Utc::now().timestamp() as f64);
                tracing::trace!(
                    target: "feed",
                    temperature = reading.temperature(),
                    humidity = reading.humidity(),
                    observed_at = %reading.observed_at(),
                    "reading ingested"
                );
            }
            Err(e) => {
                counter!("feed_message_errors_total").increment(1);
                tracing::warn!(target: "feed", error = %e, bytes = bytes.len(), "dropping malformed message");
                self.status.record_message_error(format!("message error: {e}"));
            }
        }
    }
}
