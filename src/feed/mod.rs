// src/feed/mod.rs
//! Live feed: the transport seam, the connection state machine, and the
//! transports we ship (MQTT and an in-process scripted channel).

pub mod channel;
pub mod mqtt;
pub mod subscriber;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use channel::{channel, ChannelFeed, ChannelTransport, ConnectOutcome};
pub use mqtt::MqttTransport;
pub use subscriber::StreamSubscriber;

pub const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_millis(5_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Connection state of the live feed. Starts at `Connecting`; there is no
/// terminal state while the engine is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        })
    }
}

/// What an established session yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Raw payload of one message on the subscribed topic.
    Message(Vec<u8>),
    /// Session is gone (broker disconnect, network loss, subscription revoked).
    Disconnected(String),
}

/// A publish/subscribe session the subscriber drives.
#[async_trait::async_trait]
pub trait FeedTransport: Send {
    /// Handshake and subscribe. `Ok` only once the subscription is confirmed.
    async fn connect(&mut self) -> Result<()>;

    /// Next event of the current session. Errors are treated as disconnects.
    async fn next_event(&mut self) -> Result<FeedEvent>;

    /// Drop the session immediately; no graceful drain.
    fn close(&mut self);

    fn name(&self) -> &'static str;
}

/// Timing knobs of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reconnect_period: DEFAULT_RECONNECT_PERIOD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}
