// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod backfill;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod reading;
pub mod stats;
pub mod status;
pub mod window;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::buffer::ReadingBuffer;
pub use crate::config::EngineConfig;
pub use crate::engine::{Engine, EngineOptions};
pub use crate::feed::ConnectionState;
pub use crate::reading::Reading;
pub use crate::stats::StatsSummary;
pub use crate::status::{EngineEvent, EngineStatus};
pub use crate::window::TimeWindow;
