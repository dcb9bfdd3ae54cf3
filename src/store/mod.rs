//! Record and run store abstractions.
//!
//! The import engine is written against these traits rather than concrete
//! SQL so batch transactions, duplicate matching, and run bookkeeping can
//! be exercised without a database. `find_match` lives on the transaction
//! handle on purpose: duplicate detection and creation share one
//! transaction, so two rows in the same batch cannot both pass a "no
//! duplicate" check before either write lands.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{EntityType, FieldMap, FieldValue, ImportRun, RunProgress, RunSummary};

pub use memory::{MemoryRecordStore, MemoryRunStore};
pub use postgres::{PgRecordStore, PgRunStore};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached; fatal for the whole run.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("record not found: {0}")]
    NotFound(Uuid),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// A persisted CRM record of any entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub entity_type: EntityType,
    pub fields: FieldMap,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

/// Extra scoping applied on top of the identity-field equality check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchScope {
    Any,
    /// Organizations: never resurrect archived records as duplicates.
    ActiveOnly,
    /// Activities: still open, or created after the given instant.
    OpenOrCreatedSince(DateTime<Utc>),
}

/// OR-of-equality duplicate probe, scoped to one owner and entity type.
#[derive(Debug, Clone)]
pub struct MatchQuery {
    pub entity_type: EntityType,
    pub owner_id: Uuid,
    /// Field/value pairs; a record matches if any pair matches exactly.
    pub any_of: Vec<(String, FieldValue)>,
    pub scope: MatchScope,
}

/// Entry point to record persistence; hands out one transaction per batch.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RecordTx>, StoreError>;
}

/// One batch transaction over the record store.
#[async_trait]
pub trait RecordTx: Send {
    /// Find one existing record matching the probe, including records
    /// written earlier in this transaction.
    async fn find_match(&mut self, query: &MatchQuery) -> Result<Option<StoredRecord>, StoreError>;

    async fn create(
        &mut self,
        entity_type: EntityType,
        owner_id: Uuid,
        fields: FieldMap,
    ) -> Result<StoredRecord, StoreError>;

    /// Merge `fields` into an existing record.
    async fn update(
        &mut self,
        record: &StoredRecord,
        fields: FieldMap,
    ) -> Result<StoredRecord, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Persistence for [`ImportRun`] records. The batch executor is the only
/// caller of the mutating methods for a given run.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ImportRun>, StoreError>;

    /// Transition to `importing` and record the row total + start time.
    async fn mark_importing(&self, run_id: Uuid, total_rows: u32) -> Result<(), StoreError>;

    /// Persist live counters; called after every batch, even rolled-back
    /// ones, so progress is always externally observable.
    async fn update_progress(&self, run_id: Uuid, progress: &RunProgress) -> Result<(), StoreError>;

    async fn mark_completed(&self, run_id: Uuid, summary: &RunSummary) -> Result<(), StoreError>;

    /// Terminal failure with a stored reason; valid from any in-progress
    /// state.
    async fn mark_failed(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError>;
}
