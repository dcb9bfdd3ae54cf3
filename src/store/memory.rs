//! In-memory store implementations.
//!
//! Used by the executor tests; transaction semantics are real enough to
//! matter there: writes staged in a transaction are visible to
//! `find_match` on the same transaction, invisible to everyone else, and
//! dropped on rollback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::{
    EntityType, FieldMap, FieldValue, ImportRun, ImportRunStatus, RunProgress, RunSummary,
};

use super::{MatchQuery, MatchScope, RecordStore, RecordTx, RunStore, StoreError, StoredRecord};

// ==========================================================================
// Record store
// ==========================================================================

#[derive(Default, Clone)]
pub struct MemoryRecordStore {
    committed: Arc<RwLock<HashMap<Uuid, StoredRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing record (test setup).
    pub fn insert(&self, record: StoredRecord) {
        self.committed.write().insert(record.id, record);
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.committed
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type)
            .count()
    }

    pub fn records_of(&self, entity_type: EntityType) -> Vec<StoredRecord> {
        self.committed
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn begin(&self) -> Result<Box<dyn RecordTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            committed: Arc::clone(&self.committed),
            staged: HashMap::new(),
        }))
    }
}

struct MemoryTx {
    committed: Arc<RwLock<HashMap<Uuid, StoredRecord>>>,
    /// Creates and updates made in this transaction, keyed by record id.
    staged: HashMap<Uuid, StoredRecord>,
}

fn matches(record: &StoredRecord, query: &MatchQuery) -> bool {
    if record.entity_type != query.entity_type || record.owner_id != query.owner_id {
        return false;
    }
    match query.scope {
        MatchScope::Any => {}
        MatchScope::ActiveOnly => {
            if record.archived {
                return false;
            }
        }
        MatchScope::OpenOrCreatedSince(since) => {
            let done = matches!(record.fields.get("done"), Some(FieldValue::Bool(true)));
            if done && record.created_at < since {
                return false;
            }
        }
    }
    query
        .any_of
        .iter()
        .any(|(field, value)| record.fields.get(field) == Some(value))
}

#[async_trait]
impl RecordTx for MemoryTx {
    async fn find_match(&mut self, query: &MatchQuery) -> Result<Option<StoredRecord>, StoreError> {
        if query.any_of.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = self.staged.values().find(|r| matches(r, query)) {
            return Ok(Some(hit.clone()));
        }
        let committed = self.committed.read();
        Ok(committed
            .values()
            .filter(|r| !self.staged.contains_key(&r.id))
            .find(|r| matches(r, query))
            .cloned())
    }

    async fn create(
        &mut self,
        entity_type: EntityType,
        owner_id: Uuid,
        fields: FieldMap,
    ) -> Result<StoredRecord, StoreError> {
        let record = StoredRecord {
            id: Uuid::new_v4(),
            owner_id,
            entity_type,
            fields,
            archived: false,
            created_at: Utc::now(),
        };
        self.staged.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(
        &mut self,
        record: &StoredRecord,
        fields: FieldMap,
    ) -> Result<StoredRecord, StoreError> {
        let mut updated = match self.staged.get(&record.id) {
            Some(r) => r.clone(),
            None => self
                .committed
                .read()
                .get(&record.id)
                .cloned()
                .ok_or(StoreError::NotFound(record.id))?,
        };
        updated.fields.extend(fields);
        self.staged.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut committed = self.committed.write();
        for (id, record) in self.staged {
            committed.insert(id, record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ==========================================================================
// Run store
// ==========================================================================

#[derive(Default, Clone)]
pub struct MemoryRunStore {
    runs: Arc<RwLock<HashMap<Uuid, ImportRun>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run: ImportRun) {
        self.runs.write().insert(run.id, run);
    }

    pub fn get(&self, run_id: Uuid) -> Option<ImportRun> {
        self.runs.read().get(&run_id).cloned()
    }

    fn with_run<F>(&self, run_id: Uuid, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ImportRun),
    {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;
        f(run);
        Ok(())
    }
}

fn apply_progress(run: &mut ImportRun, progress: &RunProgress) {
    run.processed_rows = progress.processed_rows;
    run.successful_imports = progress.successful_imports;
    run.failed_imports = progress.failed_imports;
    run.duplicates_skipped = progress.duplicates_skipped;
    run.progress = progress.percent();
    run.error_log = progress.error_log.clone();
    run.entity_stats = progress.entity_stats.clone();
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load(&self, session_id: &str) -> Result<Option<ImportRun>, StoreError> {
        Ok(self
            .runs
            .read()
            .values()
            .find(|r| r.session_id == session_id)
            .cloned())
    }

    async fn mark_importing(&self, run_id: Uuid, total_rows: u32) -> Result<(), StoreError> {
        self.with_run(run_id, |run| {
            run.status = ImportRunStatus::Importing;
            run.total_rows = total_rows;
            run.started_at = Some(Utc::now());
        })
    }

    async fn update_progress(&self, run_id: Uuid, progress: &RunProgress) -> Result<(), StoreError> {
        self.with_run(run_id, |run| apply_progress(run, progress))
    }

    async fn mark_completed(&self, run_id: Uuid, summary: &RunSummary) -> Result<(), StoreError> {
        self.with_run(run_id, |run| {
            run.status = ImportRunStatus::Completed;
            run.processed_rows = summary.processed_rows;
            run.successful_imports = summary.successful_imports;
            run.failed_imports = summary.failed_imports;
            run.duplicates_skipped = summary.duplicates_skipped;
            run.entity_stats = summary.entity_stats.clone();
            run.error_report_path = summary.error_report_path.clone();
            run.progress = 100;
            run.finished_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.with_run(run_id, |run| {
            run.status = ImportRunStatus::Failed;
            run.failure_reason = Some(reason.to_string());
            run.finished_at = Some(Utc::now());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(owner: Uuid, field: &str, value: &str) -> MatchQuery {
        MatchQuery {
            entity_type: EntityType::Person,
            owner_id: owner,
            any_of: vec![(field.to_string(), FieldValue::from(value))],
            scope: MatchScope::Any,
        }
    }

    #[tokio::test]
    async fn test_staged_writes_visible_in_same_tx_only() {
        let store = MemoryRecordStore::new();
        let owner = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let mut fields = FieldMap::new();
        fields.insert("email".to_string(), FieldValue::from("a@x.com"));
        tx.create(EntityType::Person, owner, fields).await.unwrap();

        let hit = tx.find_match(&query(owner, "email", "a@x.com")).await.unwrap();
        assert!(hit.is_some());
        // Not visible outside the transaction yet.
        assert_eq!(store.count(EntityType::Person), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.count(EntityType::Person), 1);
    }

    #[tokio::test]
    async fn test_rollback_drops_staged_writes() {
        let store = MemoryRecordStore::new();
        let owner = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.create(EntityType::Deal, owner, FieldMap::new()).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.count(EntityType::Deal), 0);
    }

    #[tokio::test]
    async fn test_archived_organizations_never_match() {
        let store = MemoryRecordStore::new();
        let owner = Uuid::new_v4();
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::from("Acme"));
        store.insert(StoredRecord {
            id: Uuid::new_v4(),
            owner_id: owner,
            entity_type: EntityType::Organization,
            fields,
            archived: true,
            created_at: Utc::now(),
        });

        let mut tx = store.begin().await.unwrap();
        let q = MatchQuery {
            entity_type: EntityType::Organization,
            owner_id: owner,
            any_of: vec![("name".to_string(), FieldValue::from("Acme"))],
            scope: MatchScope::ActiveOnly,
        };
        assert!(tx.find_match(&q).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_probe_never_matches() {
        let store = MemoryRecordStore::new();
        let owner = Uuid::new_v4();
        store.insert(StoredRecord {
            id: Uuid::new_v4(),
            owner_id: owner,
            entity_type: EntityType::Person,
            fields: FieldMap::new(),
            archived: false,
            created_at: Utc::now(),
        });

        let mut tx = store.begin().await.unwrap();
        let q = MatchQuery {
            entity_type: EntityType::Person,
            owner_id: owner,
            any_of: vec![],
            scope: MatchScope::Any,
        };
        assert!(tx.find_match(&q).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_old_activity_does_not_match() {
        let store = MemoryRecordStore::new();
        let owner = Uuid::new_v4();
        let mut fields = FieldMap::new();
        fields.insert("subject".to_string(), FieldValue::from("Call Alice"));
        fields.insert("done".to_string(), FieldValue::Bool(true));
        store.insert(StoredRecord {
            id: Uuid::new_v4(),
            owner_id: owner,
            entity_type: EntityType::Activity,
            fields,
            archived: false,
            created_at: Utc::now() - chrono::Duration::days(90),
        });

        let mut tx = store.begin().await.unwrap();
        let q = MatchQuery {
            entity_type: EntityType::Activity,
            owner_id: owner,
            any_of: vec![("subject".to_string(), FieldValue::from("Call Alice"))],
            scope: MatchScope::OpenOrCreatedSince(Utc::now() - chrono::Duration::days(30)),
        };
        assert!(tx.find_match(&q).await.unwrap().is_none());
    }
}
