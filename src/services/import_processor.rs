//! Import run JetStream processor
//!
//! Wraps the import engine with a JetStream work queue for:
//! - Automatic backpressure
//! - Real-time progress updates
//! - Persistence across restarts
//!
//! ## Streams
//! - `LEADLINE_IMPORT_RUNS` - queued import runs (execute and finish)

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::import::ImportEngine;
use crate::services::run_registry::RunRegistry;
use crate::store::RunStore;
use crate::types::{
    ImportSubmitResponse, QueuedRunJob, RunStatusUpdate, StartImportRequest,
};

// Stream and consumer names
const STREAM_NAME: &str = "LEADLINE_IMPORT_RUNS";
const CONSUMER_NAME: &str = "import_run_workers";
const SUBJECT: &str = "leadline.jobs.import.run";
const STATUS_PREFIX: &str = "leadline.run.import.status";

/// Import run processor with JetStream integration
pub struct RunProcessor {
    client: Client,
    js: JsContext,
    runs: Arc<dyn RunStore>,
    engine: ImportEngine,
    registry: RunRegistry,
}

impl RunProcessor {
    /// Create a new run processor, initializing the JetStream stream
    pub async fn new(
        client: Client,
        runs: Arc<dyn RunStore>,
        engine: ImportEngine,
        registry: RunRegistry,
    ) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            max_bytes: 10 * 1024 * 1024,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import run stream '{}' ready", STREAM_NAME);

        Ok(Self {
            client,
            js,
            runs,
            engine,
            registry,
        })
    }

    /// Submit an import run to the queue
    pub async fn submit_run(&self, request: StartImportRequest) -> Result<ImportSubmitResponse> {
        let job = QueuedRunJob::new(
            request.session_id.clone(),
            request.entity_type,
            request.options.unwrap_or_default(),
        );
        let session_id = job.session_id.clone();

        let payload = serde_json::to_vec(&job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!(%session_id, job_id = %job.id, "import run submitted");

        self.publish_status(RunStatusUpdate::Queued {
            session_id: session_id.clone(),
        })
        .await?;

        Ok(ImportSubmitResponse {
            session_id,
            message: "Import run submitted".to_string(),
        })
    }

    /// Publish a run status update
    pub async fn publish_status(&self, update: RunStatusUpdate) -> Result<()> {
        let session_id = match &update {
            RunStatusUpdate::Queued { session_id }
            | RunStatusUpdate::Started { session_id }
            | RunStatusUpdate::Completed { session_id, .. }
            | RunStatusUpdate::Failed { session_id, .. } => session_id.clone(),
        };
        let subject = format!("{STATUS_PREFIX}.{session_id}");
        let payload = serde_json::to_vec(&update)?;
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    /// Start processing import runs from the queue
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            filter_subject: SUBJECT.to_string(),
            ..Default::default()
        };
        let consumer = stream
            .get_or_create_consumer(CONSUMER_NAME, consumer_config)
            .await?;
        info!("JetStream import run consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    let processor = Arc::clone(&self);
                    // Runs are processed sequentially to keep per-run batch
                    // transactions from contending with each other.
                    if let Err(e) = processor.process_job(msg).await {
                        error!("Failed to process import run: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving import run message: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Process a single queued run
    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let start_time = Instant::now();
        let job: QueuedRunJob = serde_json::from_slice(&msg.payload)?;
        let session_id = job.session_id.clone();

        info!(%session_id, job_id = %job.id, "processing import run");

        self.publish_status(RunStatusUpdate::Started {
            session_id: session_id.clone(),
        })
        .await?;

        let owner_id = self
            .runs
            .load(&session_id)
            .await
            .ok()
            .flatten()
            .map(|r| r.owner_id)
            .unwrap_or_else(Uuid::nil);

        let result = self
            .engine
            .run(&session_id, job.entity_type, job.options)
            .await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match result {
            Ok(summary) => {
                self.publish_status(RunStatusUpdate::Completed {
                    session_id: session_id.clone(),
                    summary: summary.clone(),
                    duration_ms,
                })
                .await?;
                self.registry
                    .record_completed(&session_id, owner_id, summary, duration_ms);

                if let Err(e) = msg.ack().await {
                    error!("Failed to ack import run {}: {:?}", session_id, e);
                }
                info!(%session_id, duration_ms, "import run finished");
            }
            Err(e) => {
                warn!(%session_id, error = %e, "import run failed");

                self.publish_status(RunStatusUpdate::Failed {
                    session_id: session_id.clone(),
                    error: e.to_string(),
                })
                .await?;
                self.registry
                    .record_failed(&session_id, owner_id, e.to_string(), duration_ms);

                // Ack to prevent infinite retries on permanent failures
                if let Err(e) = msg.ack().await {
                    error!("Failed to ack failed import run {}: {:?}", session_id, e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(STREAM_NAME, "LEADLINE_IMPORT_RUNS");
        assert!(SUBJECT.starts_with("leadline.jobs.import"));
    }

    #[test]
    fn test_status_prefix() {
        assert!(STATUS_PREFIX.starts_with("leadline.run.import.status"));
    }
}
