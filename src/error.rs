// src/error.rs
//! Typed errors for the boundaries callers match on. Transport plumbing and
//! config loading use `anyhow` with context instead.

use thiserror::Error;

/// A payload or document that could not be turned into a `Reading`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unparseable timestamp: {0:?}")]
    Timestamp(String),
}

/// Failure of the one-shot historical fetch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("history store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("history store returned HTTP {0}")]
    Status(u16),

    #[error("history store body is not a document collection: {0}")]
    Body(String),
}

/// Unknown or invalid time window specification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("unknown time window {0:?}")]
    Unknown(String),

    #[error("window duration must be -1 (all history) or >= 0 minutes, got {0}")]
    InvalidDuration(i64),
}
