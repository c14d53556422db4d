//! Datadog Logs Demo - emits application logs through the Datadog hook
//!
//! Installs a `tracing` subscriber that prints locally and forwards every
//! accepted event to the Datadog intake, then simulates a small order service
//! until interrupted.
//!
//! ## Configuration
//!
//! Hook configuration is loaded from environment variables (see
//! [`datadog_logs_hook::Config`]); `DATADOG_API_KEY` is required.
//!
//! - `DEMO_EVENT_INTERVAL_MS`: Milliseconds between simulated events (default: 250)
//! - `RUST_LOG`: Local log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use datadog_logs_hook::{Config, ConfigError, DatadogHook, DatadogLayer, HookError};

const DEFAULT_EVENT_INTERVAL_MS: u64 = 250;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

#[tokio::main]
async fn main() {
    let started = build_hook();
    init_tracing(started.as_ref().ok().cloned());

    let hook = match started {
        Ok(hook) => hook,
        Err(e) => {
            error!(error = %e, "Failed to start Datadog log hook");
            std::process::exit(1);
        }
    };

    info!(levels = ?hook.levels(), "Datadog log hook started");

    let event_interval = std::env::var("DEMO_EVENT_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_EVENT_INTERVAL_MS);
    let simulator = tokio::spawn(run_simulator(Duration::from_millis(event_interval)));

    info!("Demo running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping..."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    simulator.abort();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, hook.shutdown()).await {
        Ok(()) => info!("Datadog log hook drained"),
        Err(_) => warn!("Datadog log hook shutdown timed out after {:?}", SHUTDOWN_TIMEOUT),
    }

    let stats = hook.stats();
    info!(
        lines_received = stats.lines_received,
        batches_delivered = stats.batches_delivered,
        batches_dropped = stats.batches_dropped,
        retries = stats.retries,
        "Demo stopped"
    );
}

fn build_hook() -> Result<Arc<DatadogHook>, StartupError> {
    let config = Config::from_env()?;
    let hook = DatadogHook::from_config(config)?;
    Ok(Arc::new(hook))
}

/// Print locally through `fmt` and forward to Datadog when the hook is up.
fn init_tracing(hook: Option<Arc<DatadogHook>>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .compact()
                .with_filter(filter),
        )
        .with(hook.map(DatadogLayer::new))
        .init();
}

/// Emit a stream of order events at roughly `every`.
async fn run_simulator(every: Duration) {
    let mut ticker = interval(every);
    let mut order_id: u64 = 0;

    loop {
        ticker.tick().await;
        order_id += 1;

        let (roll, amount_cents) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..100u32), rng.gen_range(100..50_000u64))
        };

        match roll {
            0..=2 => error!(order_id, amount_cents, "payment gateway rejected order"),
            3..=9 => warn!(order_id, amount_cents, latency_ms = 1200 + roll, "slow payment authorization"),
            10..=39 => debug!(order_id, "cart recalculated"),
            _ => info!(order_id, amount_cents, "order placed"),
        }
    }
}
