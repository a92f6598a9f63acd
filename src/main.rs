// This is the entry point of the Solvr moderation worker.
//
// **Architecture Overview:**
// - `core/` = Business logic (the moderation pipeline, no I/O)
// - `infra/` = Implementations of core traits (Groq API, SQLite)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Start the moderation queue and the pending-post sweeper
// 4. Drain everything on Ctrl+C

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{
    ModerationCollaborators, ModerationConfig, ModerationOrchestrator, ModerationQueue,
    PendingSweeper,
};
use crate::infra::moderation::{GroqConfig, GroqModerationClient};
use crate::infra::posts::SqlitePostStore;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Comma-separated milliseconds, e.g. "2000,4000,8000". Invalid or empty input yields None.
fn parse_delays(value: &str) -> Option<Vec<Duration>> {
    let delays = value
        .split(',')
        .map(|part| part.trim().parse::<u64>().map(Duration::from_millis))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if delays.is_empty() {
        None
    } else {
        Some(delays)
    }
}

fn load_moderation_config() -> ModerationConfig {
    let defaults = ModerationConfig::default();

    let retry_delays = match std::env::var("MODERATION_RETRY_DELAYS_MS") {
        Ok(raw) => parse_delays(&raw).unwrap_or_else(|| {
            tracing::warn!("Invalid MODERATION_RETRY_DELAYS_MS={:?}, using defaults", raw);
            defaults.retry_delays.clone()
        }),
        Err(_) => defaults.retry_delays.clone(),
    };

    ModerationConfig {
        retry_delays,
        run_timeout: env_parse::<u64>("MODERATION_RUN_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.run_timeout),
        side_effect_timeout: env_parse::<u64>("MODERATION_SIDE_EFFECT_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.side_effect_timeout),
        workers: env_parse("MODERATION_WORKERS").unwrap_or(defaults.workers),
        queue_capacity: env_parse("MODERATION_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
        sweep_interval: env_parse::<u64>("MODERATION_SWEEP_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval),
        sweep_batch: env_parse("MODERATION_SWEEP_BATCH").unwrap_or(defaults.sweep_batch),
        shutdown_grace: env_parse::<u64>("MODERATION_SHUTDOWN_GRACE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace),
    }
}

fn load_groq_config() -> GroqConfig {
    let defaults = GroqConfig::default();
    GroqConfig {
        base_url: std::env::var("GROQ_BASE_URL").unwrap_or(defaults.base_url),
        model: std::env::var("GROQ_MODEL").unwrap_or(defaults.model),
        timeout: env_parse::<u64>("GROQ_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let groq_api_key = std::env::var("GROQ_API_KEY")
        .context("Missing GROQ_API_KEY environment variable! Add it to your .env file.")?;

    let database_path =
        std::env::var("SOLVR_DATABASE_PATH").unwrap_or_else(|_| "data/solvr.db".to_string());
    if let Some(parent) = std::path::Path::new(&database_path).parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let config = load_moderation_config();
    tracing::info!(
        retry_delays = ?config.retry_delays,
        run_timeout = ?config.run_timeout,
        workers = config.workers,
        "Moderation config loaded"
    );

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where we wire everything together.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", database_path))
        .await
        .context("Failed to connect to posts DB")?;
    let store = Arc::new(SqlitePostStore::new(pool));
    store.migrate().await.context("Failed to migrate posts DB")?;

    let moderator = Arc::new(
        GroqModerationClient::new(groq_api_key, load_groq_config())
            .context("Failed to create Groq client")?,
    );

    let orchestrator = ModerationOrchestrator::new(
        ModerationCollaborators {
            moderator,
            posts: store.clone(),
            flags: store.clone(),
            comments: store.clone(),
            notifier: store.clone(),
        },
        &config,
    )
    .context("Invalid moderation retry schedule")?;

    let queue = Arc::new(ModerationQueue::start(
        Arc::new(orchestrator),
        config.workers,
        config.queue_capacity,
    ));

    // Background sweeper: feeds pending_review posts into the queue.
    let shutdown = CancellationToken::new();
    let sweeper = PendingSweeper::new(store.clone(), Arc::clone(&queue), config.sweep_batch);
    let sweep_interval = config.sweep_interval;
    let sweeper_shutdown = shutdown.clone();
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(sweep_interval, sweeper_shutdown).await;
    });

    tracing::info!("Moderation worker is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested, draining moderation queue");
    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        tracing::error!("Sweeper task failed: {}", e);
    }
    let tally = queue.shutdown(config.shutdown_grace).await;
    tracing::info!(
        succeeded = tally.succeeded,
        gave_up = tally.gave_up,
        cancelled = tally.cancelled,
        "Moderation worker stopped"
    );

    Ok(())
}
