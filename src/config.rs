// src/config.rs
//! Engine configuration: TOML or JSON, chosen by file extension.
//!
//! Lookup order for `load_default()`:
//! 1) `$TELEMETRY_CONFIG_PATH`
//! 2) `config/telemetry.toml`
//! 3) `config/telemetry.json`
//! 4) built-in defaults
//!
//! Secret fields set to `"ENV"` are read from `MQTT_PASSWORD` (feed) and
//! `FIREBASE_AUTH` (backfill).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::buffer::DEFAULT_CAPACITY;
use crate::feed::{ReconnectPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_PERIOD};
use crate::window::{TimeWindow, DEFAULT_WINDOW_ID};

pub const ENV_CONFIG_PATH: &str = "TELEMETRY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/telemetry.toml";
const FALLBACK_JSON_PATH: &str = "config/telemetry.json";

const ENV_MQTT_PASSWORD: &str = "MQTT_PASSWORD";
const ENV_FIREBASE_AUTH: &str = "FIREBASE_AUTH";

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}
fn default_topic() -> String {
    "esp32/dht22".to_string()
}
fn default_client_id() -> String {
    format!("telemetry-engine-{:08x}", rand::random::<u32>())
}
fn default_reconnect_period_ms() -> u64 {
    DEFAULT_RECONNECT_PERIOD.as_millis() as u64
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_collection() -> String {
    "measurements".to_string()
}
fn default_backfill_timeout_ms() -> u64 {
    10_000
}
fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_window() -> String {
    DEFAULT_WINDOW_ID.to_string()
}
fn default_shutdown_timeout_ms() -> u64 {
    2_000
}
fn default_true() -> bool {
    true
}

/// Live feed options. Field names follow the broker client options
/// (`brokerURL`, `clientId`, ...); snake_case aliases are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(rename = "brokerURL", alias = "broker_url", default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(rename = "clientId", alias = "client_id", default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(
        rename = "reconnectPeriodMs",
        alias = "reconnect_period_ms",
        default = "default_reconnect_period_ms"
    )]
    pub reconnect_period_ms: u64,
    #[serde(
        rename = "connectTimeoutMs",
        alias = "connect_timeout_ms",
        default = "default_connect_timeout_ms"
    )]
    pub connect_timeout_ms: u64,
    #[serde(
        rename = "keepAliveSecs",
        alias = "keep_alive_secs",
        default = "default_keep_alive_secs"
    )]
    pub keep_alive_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username: None,
            password: None,
            client_id: default_client_id(),
            topic: default_topic(),
            reconnect_period_ms: default_reconnect_period_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl FeedConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            reconnect_period: Duration::from_millis(self.reconnect_period_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// Historical store options.
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// e.g. `https://<project>.firebasedatabase.app`; empty disables backfill.
    #[serde(rename = "baseUrl", alias = "base_url", default)]
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub auth: Option<String>,
    /// Defaults to the buffer capacity.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(
        rename = "timeoutMs",
        alias = "timeout_ms",
        default = "default_backfill_timeout_ms"
    )]
    pub timeout_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            collection: default_collection(),
            auth: None,
            limit: None,
            timeout_ms: default_backfill_timeout_ms(),
        }
    }
}

impl BackfillConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.base_url.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(rename = "defaultWindow", alias = "default_window", default = "default_window")]
    pub default_window: String,
    #[serde(
        rename = "shutdownTimeoutMs",
        alias = "shutdown_timeout_ms",
        default = "default_shutdown_timeout_ms"
    )]
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            backfill: BackfillConfig::default(),
            buffer: BufferConfig::default(),
            default_window: default_window(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load from an explicit path, resolve `ENV` secrets and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing engine config {}", path.display()))?;
        cfg.resolve_secrets()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for p in [DEFAULT_CONFIG_PATH, FALLBACK_JSON_PATH] {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        let mut cfg = Self::default();
        cfg.resolve_secrets()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 {
            bail!("buffer.capacity must be > 0");
        }
        if self.feed.topic.trim().is_empty() {
            bail!("feed.topic must not be empty");
        }
        if self.feed.client_id.trim().is_empty() || self.feed.client_id.starts_with(' ') {
            bail!("feed.clientId must not be empty or start with a space");
        }
        if self.feed.reconnect_period_ms == 0 {
            bail!("feed.reconnectPeriodMs must be > 0");
        }
        if self.feed.connect_timeout_ms == 0 {
            bail!("feed.connectTimeoutMs must be > 0");
        }
        if self.backfill.limit == Some(0) {
            bail!("backfill.limit must be > 0");
        }
        self.default_window
            .parse::<TimeWindow>()
            .context("defaultWindow")?;
        Ok(())
    }

    pub fn default_window(&self) -> TimeWindow {
        self.default_window.parse().unwrap_or_default()
    }

    pub fn backfill_limit(&self) -> usize {
        self.backfill.limit.unwrap_or(self.buffer.capacity)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        if is_env_marker(self.feed.password.as_deref()) {
            self.feed.password = Some(
                env::var(ENV_MQTT_PASSWORD)
                    .map_err(|_| anyhow!("Missing {ENV_MQTT_PASSWORD} env var"))?,
            );
        }
        if !self.backfill.is_active() {
            self.backfill.auth = None;
        } else if is_env_marker(self.backfill.auth.as_deref()) {
            self.backfill.auth = Some(
                env::var(ENV_FIREBASE_AUTH)
                    .map_err(|_| anyhow!("Missing {ENV_FIREBASE_AUTH} env var"))?,
            );
        }
        Ok(())
    }
}

fn is_env_marker(v: Option<&str>) -> bool {
    v.is_some_and(|s| s.trim().eq_ignore_ascii_case("env"))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<EngineConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("invalid JSON config");
    }
    toml::from_str(s).context("invalid TOML config")
}
