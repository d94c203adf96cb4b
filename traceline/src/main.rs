// /////////////////////////////////////////////////////////////////////////////
// Traceline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Traceline Service Binary
//!
//! Wires the event repository for standalone operation: configuration from
//! the environment, SQLite storage, the in-process broker, and a periodic
//! retention sweep. Runs until SIGINT/SIGTERM, then drains the flush
//! scheduler within the shutdown grace period.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use traceline::application::services::EventRepository;
use traceline::infrastructure::config::EventsConfig;
use traceline::infrastructure::messaging::InMemoryEventBroker;
use traceline::infrastructure::metrics::MetricsService;
use traceline::infrastructure::repositories::{ensure_schema, SqliteTaskEventStore};
use traceline_bootstrap::{init_logging, wait_for_signal, ShutdownCoordinator};

#[derive(Parser, Debug)]
#[command(name = "traceline", about = "Trace/event repository service", version)]
struct Args {
    /// Seconds between retention sweeps.
    #[arg(long, default_value_t = 3600)]
    retention_sweep_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let config = EventsConfig::from_env().context("loading configuration")?;
    info!(
        "Starting traceline (batch_size={}, batch_interval={}ms, retention={}d)",
        config.batch_size, config.batch_interval, config.default_log_retention
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .context("parsing DATABASE_URL")?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await
        .context("connecting to database")?;
    ensure_schema(&pool).await.context("applying schema")?;

    let metrics = MetricsService::new().context("creating metrics service")?;
    let broker = Arc::new(InMemoryEventBroker::new());
    let store = Arc::new(SqliteTaskEventStore::new(pool.clone()));

    let repository = Arc::new(EventRepository::new(store, broker, metrics, &config));

    let coordinator = ShutdownCoordinator::default();
    let sweep = tokio::spawn(retention_sweep(
        repository.clone(),
        Duration::from_secs(args.retention_sweep_interval.max(1)),
        coordinator.token(),
    ));

    wait_for_signal().await;
    info!("Shutdown signal received; draining");

    coordinator.initiate_shutdown();
    let drained = coordinator
        .drain_within_grace(async {
            let _ = sweep.await;
            repository.shutdown().await;
        })
        .await;
    if !drained {
        warn!("Shutdown grace period expired before the flush drained");
    }

    pool.close().await;
    info!("Bye");
    Ok(())
}

/// Periodically deletes span rows past the retention horizon.
async fn retention_sweep(
    repository: Arc<EventRepository>,
    interval: Duration,
    token: traceline_bootstrap::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = repository.truncate_events().await {
                    warn!("Retention sweep failed: {}", e);
                }
            }
        }
    }
}
