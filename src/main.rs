//! Telemetry Engine: binary entrypoint.
//! Loads config, starts the live feed + backfill engine, and serves the
//! read-only query API with Prometheus metrics.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telemetry_engine::api::{self, AppState};
use telemetry_engine::metrics::Metrics;
use telemetry_engine::{Engine, EngineConfig};

/// Compact logs; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("telemetry_engine=info,warn"));

    // Shuttle may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EngineConfig::load_default()?;
    tracing::info!(
        broker = %cfg.feed.broker_url,
        topic = %cfg.feed.topic,
        client_id = %cfg.feed.client_id,
        password_len = cfg.feed.password.as_deref().map_or(0, str::len),
        backfill = cfg.backfill.is_active(),
        "config loaded"
    );

    let metrics = Metrics::install(cfg.buffer.capacity)?;
    let engine = Arc::new(Engine::from_config(&cfg)?);

    let state = AppState::new(engine, cfg.default_window());
    let router = api::router(state).merge(metrics.router());

    Ok(router.into())
}
