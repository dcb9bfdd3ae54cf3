//! Import run request handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use futures::StreamExt;
use tracing::error;
use uuid::Uuid;

use crate::services::import_processor::RunProcessor;
use crate::services::run_registry::RunRegistry;
use crate::store::RunStore;
use crate::types::{
    ErrorResponse, Request, RunHistoryRequest, RunStatusRequest, StartImportRequest,
    SuccessResponse,
};

const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Handle leadline.import.execute requests (single-entity run)
pub async fn handle_execute(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    processor: Arc<RunProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<StartImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import execute request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if request.payload.entity_type.is_none() {
            let error = ErrorResponse::new(
                request.id,
                "INVALID_REQUEST",
                "entityType is required for single-entity runs",
            );
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        match processor.submit_run(request.payload).await {
            Ok(response) => {
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to submit import run: {}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle leadline.import.finish requests (multi-entity run)
pub async fn handle_finish(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    processor: Arc<RunProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<StartImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import finish request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        // A finish run always covers every mapped entity type.
        let mut payload = request.payload;
        payload.entity_type = None;

        match processor.submit_run(payload).await {
            Ok(response) => {
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to submit import run: {}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle leadline.import.status requests
pub async fn handle_status(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    runs: Arc<dyn RunStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<RunStatusRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import status request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let session_id = &request.payload.session_id;
        match runs.load(session_id).await {
            Ok(Some(run)) => {
                let success = SuccessResponse::new(request.id, run);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(
                    request.id,
                    "NOT_FOUND",
                    format!("no import run found for session {session_id}"),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to load import run: {}", e);
                let error = ErrorResponse::new(request.id, "STORE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle leadline.import.history requests
pub async fn handle_history(
    client: Client,
    mut subscriber: async_nats::Subscriber,
    registry: RunRegistry,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<RunHistoryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import history request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let Some(owner_id) = request.owner_id else {
            let error = ErrorResponse::new(request.id, "INVALID_REQUEST", "ownerId is required");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        };

        let limit = request.payload.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let history = registry.recent_for_owner(owner_id, limit);
        let success = SuccessResponse::new(request.id, history);
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
    }

    Ok(())
}
