//! # Time Window
//! Named inclusion predicate over reading age, evaluated against `now` at
//! query time (never frozen at insertion). A reading can age out between two
//! queries without anything in the buffer changing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::WindowError;
use crate::reading::Reading;

/// Duration value meaning "all history".
pub const UNBOUNDED: i64 = -1;

/// Default dashboard window.
pub const DEFAULT_WINDOW_ID: &str = "30m";

/// Presets offered to dashboards, shortest first.
const PRESETS: &[(&str, i64)] = &[
    ("5m", 5),
    ("15m", 15),
    ("30m", 30),
    ("1h", 60),
    ("6h", 360),
    ("24h", 1440),
    ("all", UNBOUNDED),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    id: String,
    duration_minutes: i64,
}

impl TimeWindow {
    /// A finite window (`minutes >= 0`, within chrono's `TimeDelta` range)
    /// or the unbounded one (`-1`).
    pub fn new(id: impl Into<String>, duration_minutes: i64) -> Result<Self, WindowError> {
        let in_range =
            duration_minutes == UNBOUNDED || Duration::try_minutes(duration_minutes).is_some();
        if duration_minutes < UNBOUNDED || !in_range {
            return Err(WindowError::InvalidDuration(duration_minutes));
        }
        Ok(Self {
            id: id.into(),
            duration_minutes,
        })
    }

    pub fn all() -> Self {
        Self {
            id: "all".to_string(),
            duration_minutes: UNBOUNDED,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_minutes
    }

    pub fn is_unbounded(&self) -> bool {
        self.duration_minutes == UNBOUNDED
    }

    /// `true` iff the window is unbounded or `now - observed_at <= duration`.
    /// Readings stamped in the future always pass.
    pub fn contains(&self, reading: &Reading, now: DateTime<Utc>) -> bool {
        match Duration::try_minutes(self.duration_minutes) {
            Some(span) if !self.is_unbounded() => now - reading.observed_at() <= span,
            _ => true,
        }
    }

    /// Filter an ordered slice, preserving order.
    pub fn apply(&self, readings: &[Reading], now: DateTime<Utc>) -> Vec<Reading> {
        if self.is_unbounded() {
            return readings.to_vec();
        }
        readings
            .iter()
            .filter(|r| self.contains(r, now))
            .copied()
            .collect()
    }

    pub fn presets() -> Vec<TimeWindow> {
        PRESETS
            .iter()
            .map(|(id, m)| TimeWindow {
                id: (*id).to_string(),
                duration_minutes: *m,
            })
            .collect()
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            id: DEFAULT_WINDOW_ID.to_string(),
            duration_minutes: 30,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Accepts the preset ids plus free-form `<n>m`, `<n>h`, `<n>d`.
impl FromStr for TimeWindow {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_lowercase();
        if let Some((_, m)) = PRESETS.iter().find(|(p, _)| *p == id) {
            return TimeWindow::new(id, *m);
        }

        let unknown = || WindowError::Unknown(s.to_string());
        if id.len() < 2 || !id.is_ascii() {
            return Err(unknown());
        }
        let (num, unit) = id.split_at(id.len() - 1);
        let n: i64 = num.parse().map_err(|_| unknown())?;
        if n < 0 {
            return Err(WindowError::InvalidDuration(n));
        }
        let minutes = match unit {
            "m" => Some(n),
            "h" => n.checked_mul(60),
            "d" => n.checked_mul(1440),
            _ => None,
        }
        .ok_or_else(unknown)?;
        TimeWindow::new(id, minutes)
    }
}
