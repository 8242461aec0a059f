// src/backfill/mod.rs
//! One-shot historical backfill.
//!
//! The store hands back a keyed collection of documents in no particular
//! order. Documents that don't decode are skipped and counted; the rest are
//! sorted by `observed_at` and trimmed to the most recent `limit`.

pub mod firebase;

use metrics::counter;
use serde::Deserialize;

use crate::error::{DecodeError, LoadError};
use crate::metrics::ensure_metrics_described;
use crate::reading::{RawTimestamp, Reading};

pub use firebase::FirebaseStore;

/// Raw keyed documents as returned by a history store.
pub type KeyedDocuments = Vec<(String, serde_json::Value)>;

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Fetch up to `limit` documents (stores may return more or fewer).
    async fn fetch_documents(&self, limit: usize) -> Result<KeyedDocuments, LoadError>;
    fn name(&self) -> &'static str;
}

/// Wire shape of a stored measurement.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryDocument {
    #[serde(default, alias = "deviceId")]
    pub device_id: Option<String>,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: RawTimestamp,
}

impl HistoryDocument {
    pub fn into_reading(self) -> Result<Reading, DecodeError> {
        let observed_at = self.timestamp.to_utc()?;
        Ok(Reading::new(self.temperature, self.humidity, observed_at))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub loaded: usize,
    pub rejected: usize,
}

/// Decode, sort and trim. Per-document failures never abort the batch.
pub fn decode_documents(docs: KeyedDocuments, limit: usize) -> (Vec<Reading>, BackfillReport) {
    let mut rejected = 0usize;
    let mut readings = Vec::with_capacity(docs.len());

    for (key, value) in docs {
        let decoded = serde_json::from_value::<HistoryDocument>(value)
            .map_err(DecodeError::from)
            .and_then(|doc| {
                let device = doc.device_id.clone();
                doc.into_reading().map(|r| (r, device))
            });
        match decoded {
            Ok((reading, device)) => {
                tracing::trace!(target: "backfill", %key, device = ?device, "document decoded");
                readings.push(reading);
            }
            Err(e) => {
                rejected += 1;
                tracing::warn!(target: "backfill", %key, error = %e, "skipping malformed document");
            }
        }
    }

    readings.sort_by_key(|r| r.observed_at());
    let excess = readings.len().saturating_sub(limit);
    if excess > 0 {
        readings.drain(0..excess);
    }

    let report = BackfillReport {
        loaded: readings.len(),
        rejected,
    };
    (readings, report)
}

/// Fetch and decode the history once.
pub async fn load(
    store: &dyn HistoryStore,
    limit: usize,
) -> Result<(Vec<Reading>, BackfillReport), LoadError> {
    ensure_metrics_described();

    let docs = match store.fetch_documents(limit).await {
        Ok(d) => d,
        Err(e) => {
            counter!("backfill_failures_total").increment(1);
            return Err(e);
        }
    };
    let fetched = docs.len();
    let (readings, report) = decode_documents(docs, limit);

    counter!("backfill_documents_total").increment(fetched as u64);
    counter!("backfill_rejected_total").increment(report.rejected as u64);
    tracing::info!(
        target: "backfill",
        store = store.name(),
        fetched,
        loaded = report.loaded,
        rejected = report.rejected,
        "history loaded"
    );
    Ok((readings, report))
}
