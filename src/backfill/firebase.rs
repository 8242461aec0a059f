// src/backfill/firebase.rs
//! Firebase Realtime Database REST reader:
//! `GET {base}/{collection}.json?orderBy="timestamp"&limitToLast=N[&auth=TOKEN]`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{HistoryStore, KeyedDocuments};
use crate::config::BackfillConfig;
use crate::error::LoadError;

pub struct FirebaseStore {
    base_url: String,
    collection: String,
    auth: Option<String>,
    client: reqwest::Client,
}

impl FirebaseStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        auth: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            collection: collection.into(),
            auth: auth.filter(|a| !a.trim().is_empty()),
            client,
        })
    }

    pub fn from_config(cfg: &BackfillConfig) -> Result<Self, LoadError> {
        Self::new(
            cfg.base_url.clone(),
            cfg.collection.clone(),
            cfg.auth.clone(),
            Duration::from_millis(cfg.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            self.collection.trim_matches('/')
        )
    }

    fn query(&self, limit: usize) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("orderBy", "\"timestamp\"".to_string()),
            ("limitToLast", limit.to_string()),
        ];
        if let Some(token) = &self.auth {
            q.push(("auth", token.clone()));
        }
        q
    }
}

/// `null` is an empty collection; arrays show up when keys are dense integers.
fn into_documents(body: Value) -> Result<KeyedDocuments, LoadError> {
    match body {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect()),
        other => Err(LoadError::Body(format!(
            "expected an object of documents, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl HistoryStore for FirebaseStore {
    async fn fetch_documents(&self, limit: usize) -> Result<KeyedDocuments, LoadError> {
        let resp = self
            .client
            .get(self.endpoint())
            .query(&self.query(limit))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Status(status.as_u16()));
        }

        let text = resp.text().await?;
        let body: Value =
            serde_json::from_str(&text).map_err(|e| LoadError::Body(e.to_string()))?;
        into_documents(body)
    }

    fn name(&self) -> &'static str {
        "firebase"
    }
}
