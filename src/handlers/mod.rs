//! NATS message handlers

pub mod import;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info};

use crate::config::Config;
use crate::import::ImportEngine;
use crate::services::import_processor::RunProcessor;
use crate::services::run_registry::RunRegistry;
use crate::store::{PgRecordStore, PgRunStore, RecordStore, RunStore};

/// Start all message handlers
pub async fn start_handlers(client: Client, pool: PgPool, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let records: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool.clone()));
    let runs: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool));
    let engine = ImportEngine::new(records, Arc::clone(&runs), config.report_dir.clone());
    let registry = RunRegistry::new();

    let processor = Arc::new(
        RunProcessor::new(client.clone(), Arc::clone(&runs), engine, registry.clone()).await?,
    );

    // Subscribe to all subjects
    let execute_sub = client.subscribe("leadline.import.execute").await?;
    let finish_sub = client.subscribe("leadline.import.finish").await?;
    let status_sub = client.subscribe("leadline.import.status").await?;
    let history_sub = client.subscribe("leadline.import.history").await?;

    // Start the JetStream run consumer
    let run_consumer = Arc::clone(&processor);
    tokio::spawn(async move {
        if let Err(e) = run_consumer.start_processing().await {
            error!("Import run processor error: {}", e);
        }
    });

    info!("All handlers subscribed, worker ready");

    select! {
        r = import::handle_execute(client.clone(), execute_sub, Arc::clone(&processor)) => r?,
        r = import::handle_finish(client.clone(), finish_sub, Arc::clone(&processor)) => r?,
        r = import::handle_status(client.clone(), status_sub, Arc::clone(&runs)) => r?,
        r = import::handle_history(client.clone(), history_sub, registry.clone()) => r?,
    }

    Ok(())
}
