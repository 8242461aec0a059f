//! Aggregate statistics over a set of readings. Always recomputed, never cached.

use serde::Serialize;

use crate::reading::Reading;

/// Avg/min/max per measured field. All zero for an empty input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub avg_temperature: f64,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub avg_humidity: f64,
    pub min_humidity: f64,
    pub max_humidity: f64,
}

/// Single pass over `readings`.
pub fn summarize(readings: &[Reading]) -> StatsSummary {
    let Some(first) = readings.first() else {
        return StatsSummary::default();
    };

    let mut t = FieldAcc::seed(first.temperature());
    let mut h = FieldAcc::seed(first.humidity());
    for r in &readings[1..] {
        t.push(r.temperature());
        h.push(r.humidity());
    }

    let n = readings.len() as f64;
    StatsSummary {
        avg_temperature: t.sum / n,
        min_temperature: t.min,
        max_temperature: t.max,
        avg_humidity: h.sum / n,
        min_humidity: h.min,
        max_humidity: h.max,
    }
}

struct FieldAcc {
    sum: f64,
    min: f64,
    max: f64,
}

impl FieldAcc {
    fn seed(v: f64) -> Self {
        Self {
            sum: v,
            min: v,
            max: v,
        }
    }

    fn push(&mut self, v: f64) {
        self.sum += v;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn empty_is_all_zero() {
        assert_eq!(summarize(&[]), StatsSummary::default());
    }

    #[test]
    fn single_reading_is_its_own_min_max_avg() {
        let r = Reading::new(23.4, 55.0, Utc::now());
        let s = summarize(&[r]);
        assert_eq!(s.avg_temperature, 23.4);
        assert_eq!(s.min_temperature, 23.4);
        assert_eq!(s.max_temperature, 23.4);
        assert_eq!(s.avg_humidity, 55.0);
        assert_eq!(s.min_humidity, 55.0);
        assert_eq!(s.max_humidity, 55.0);
    }

    #[test]
    fn mixed_values() {
        let now = Utc::now();
        let rs = vec![
            Reading::new(20.0, 40.0, now - Duration::seconds(2)),
            Reading::new(-4.0, 60.0, now - Duration::seconds(1)),
            Reading::new(26.0, 50.0, now),
        ];
        let s = summarize(&rs);
        assert!((s.avg_temperature - 14.0).abs() < 1e-9);
        assert_eq!(s.min_temperature, -4.0);
        assert_eq!(s.max_temperature, 26.0);
        assert!((s.avg_humidity - 50.0).abs() < 1e-9);
        assert_eq!(s.min_humidity, 40.0);
        assert_eq!(s.max_humidity, 60.0);
    }
}
