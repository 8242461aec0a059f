//! # Reading
//! The timestamped temperature/humidity sample that flows from the feeders
//! into the buffer, plus the decoders for the live payload and for the
//! timestamp formats the devices and the history store emit.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Epoch values above this are treated as milliseconds, below as seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// One immutable sample. `observed_at` is the ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    temperature: f64,
    humidity: f64,
    observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            temperature,
            humidity,
            observed_at,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Decode a live-feed message body:
    /// `{"temperature": 21.5, "humidity": 40, "timestamp": "2025-01-01T10:00:00Z"}`.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, DecodeError> {
        let payload: LivePayload = serde_json::from_slice(bytes)?;
        let observed_at = payload.timestamp.to_utc()?;
        Ok(Self::new(payload.temperature, payload.humidity, observed_at))
    }
}

#[derive(Debug, Deserialize)]
struct LivePayload {
    temperature: f64,
    humidity: f64,
    timestamp: RawTimestamp,
}

/// Timestamp as it appears on the wire: text in one of several date formats,
/// or a Unix epoch number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    Epoch(f64),
}

impl RawTimestamp {
    pub fn to_utc(&self) -> Result<DateTime<Utc>, DecodeError> {
        match self {
            RawTimestamp::Text(s) => {
                parse_timestamp(s).ok_or_else(|| DecodeError::Timestamp(s.clone()))
            }
            RawTimestamp::Epoch(n) => {
                from_epoch(*n).ok_or_else(|| DecodeError::Timestamp(n.to_string()))
            }
        }
    }
}

/// Parse the textual timestamp formats we accept. Offsets are honoured;
/// naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }

    // Digits only: epoch sent as a string.
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() {
        return None;
    }
    let millis = if n.abs() > EPOCH_MILLIS_THRESHOLD {
        n
    } else {
        n * 1_000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}
