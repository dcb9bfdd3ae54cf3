//! Leadline Worker - background import service for the Leadline CRM
//!
//! Connects to NATS, consumes queued import runs, and persists results
//! through PostgreSQL.

mod cli;
mod config;
mod db;
mod handlers;
mod import;
mod services;
mod store;
mod types;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,leadline_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    let args = cli::Cli::parse();

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    match args.command {
        Some(cli::Command::Migrate) => {
            db::run_migrations(&pool).await?;
            return Ok(());
        }
        Some(cli::Command::Reconcile) => {
            let orphaned = db::reconcile_orphaned_runs(&pool).await?;
            info!(orphaned, "reconciliation sweep complete");
            return Ok(());
        }
        Some(cli::Command::Serve) | None => {}
    }

    info!("Starting Leadline Worker...");

    db::run_migrations(&pool).await?;

    // Runs orphaned by a previous crash can never finish.
    db::reconcile_orphaned_runs(&pool).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    // Start message handlers
    if let Err(e) = handlers::start_handlers(nats_client, pool, &config).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}
