//! Batch executor: drives one import run end to end.
//!
//! Rows are fully materialized, sliced into fixed-size batches, and each
//! batch runs inside one store transaction. Within a row, entity types
//! are processed in [`EntityType::PROCESSING_ORDER`] so dependents always
//! see their parents. Counters are persisted after every batch, even
//! rolled-back ones.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{RecordStore, RecordTx, RunStore, StoreError, StoredRecord};
use crate::types::{
    DuplicateHandling, EntityStats, EntityType, FieldMap, FieldValue, ImportErrorEntry,
    ImportOptions, ImportRun, RunProgress, RunSummary,
};

use super::mapping::EntityMapping;
use super::linker::SiblingSet;
use super::{dedupe, linker, mapping, reader, report, ImportError};

const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Fields never written through duplicate updates.
const PROTECTED_FIELDS: [&str; 5] = ["id", "ownerId", "createdAt", "updatedAt", "addTime"];

fn required_fields(entity: EntityType) -> &'static [&'static str] {
    match entity {
        EntityType::Person | EntityType::Lead => &["contactName"],
        EntityType::Deal => &["title"],
        EntityType::Organization => &["name"],
        EntityType::Activity => &["subject"],
    }
}

/// Transient accumulator for one batch. Merged into the run counters only
/// when the batch commits; a rolled-back batch discards it.
#[derive(Default)]
struct BatchResult {
    successful: u32,
    failed: u32,
    duplicates: u32,
    stats: BTreeMap<EntityType, EntityStats>,
    errors: Vec<ImportErrorEntry>,
}

impl BatchResult {
    fn stats_mut(&mut self, entity: EntityType) -> &mut EntityStats {
        self.stats.entry(entity).or_default()
    }
}

/// Records created or updated earlier in the same run, looked up by
/// identity values. A later row matching one of these reuses it silently
/// instead of going through duplicate handling.
#[derive(Default)]
struct CreatedIndex {
    records: Vec<StoredRecord>,
}

impl CreatedIndex {
    fn find(&self, entity: EntityType, owner_id: Uuid, fields: &FieldMap) -> Option<&StoredRecord> {
        let probes = dedupe::identity_values(entity, fields);
        if probes.is_empty() {
            return None;
        }
        self.records.iter().find(|r| {
            r.entity_type == entity
                && r.owner_id == owner_id
                && probes.iter().any(|(k, v)| r.fields.get(k) == Some(v))
        })
    }

    fn insert(&mut self, record: StoredRecord) {
        self.records.push(record);
    }

    fn extend(&mut self, other: CreatedIndex) {
        self.records.extend(other.records);
    }
}

enum BatchError {
    /// Transaction-level failure: roll back and continue with the next
    /// batch, counting this batch's rows as failed.
    Store(StoreError),
    /// A row failed with `continue_on_error = false`; fatal for the run.
    RowFatal(ImportErrorEntry),
}

enum EntityError {
    Validation(String),
    Store(StoreError),
}

impl From<StoreError> for EntityError {
    fn from(e: StoreError) -> Self {
        EntityError::Store(e)
    }
}

pub struct ImportEngine {
    records: Arc<dyn RecordStore>,
    runs: Arc<dyn RunStore>,
    report_dir: String,
}

impl ImportEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        runs: Arc<dyn RunStore>,
        report_dir: impl Into<String>,
    ) -> Self {
        Self {
            records,
            runs,
            report_dir: report_dir.into(),
        }
    }

    /// Execute the import for `session_id`. `restrict` limits the run to a
    /// single entity type; `None` processes every mapped entity type.
    pub async fn run(
        &self,
        session_id: &str,
        restrict: Option<EntityType>,
        options: ImportOptions,
    ) -> Result<RunSummary, ImportError> {
        let run = self
            .runs
            .load(session_id)
            .await?
            .ok_or_else(|| ImportError::RunNotFound(session_id.to_string()))?;

        if !run.status.can_start_import() {
            return Err(ImportError::InvalidStatus {
                session: session_id.to_string(),
                status: run.status,
            });
        }
        let saved_mapping = run
            .column_mapping
            .as_ref()
            .ok_or_else(|| ImportError::MappingMissing(session_id.to_string()))?;

        let mut entity_mapping = mapping::group_by_entity(saved_mapping);
        if let Some(entity) = restrict {
            entity_mapping.retain_entity(entity);
        }

        let rows = self.read_file(&run).await?;
        let total_rows = rows.len() as u32;

        self.runs.mark_importing(run.id, total_rows).await?;
        info!(
            session_id,
            total_rows,
            batch_size = options.batch_size,
            "import run started"
        );

        self.execute_batches(&run, rows, &entity_mapping, &options)
            .await
    }

    async fn read_file(&self, run: &ImportRun) -> Result<Vec<Vec<String>>, ImportError> {
        let path = run.file_path.clone();
        let file_type = run.file_type.clone();
        let result = tokio::task::spawn_blocking(move || reader::read_rows(&path, &file_type))
            .await
            .map_err(|e| ImportError::FileRead(e.to_string()))?;

        if let Err(ImportError::FileRead(reason)) = &result {
            // Unreadable file is fatal for the run, not a caller error.
            self.fail_run(run.id, reason).await;
        }
        result
    }

    async fn execute_batches(
        &self,
        run: &ImportRun,
        rows: Vec<Vec<String>>,
        entity_mapping: &EntityMapping,
        options: &ImportOptions,
    ) -> Result<RunSummary, ImportError> {
        let mut progress = RunProgress::new(rows.len() as u32);
        let mut all_errors: Vec<ImportErrorEntry> = Vec::new();
        let mut created = CreatedIndex::default();
        let batch_size = options.batch_size.max(1);

        for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
            // Header is row 1, so the first data row is row 2.
            let base_row = (batch_index * batch_size) as u32 + 2;

            match self
                .process_batch(batch, base_row, run.owner_id, entity_mapping, options, &created)
                .await
            {
                Ok((result, batch_created)) => {
                    progress.processed_rows += batch.len() as u32;
                    progress.successful_imports += result.successful;
                    progress.failed_imports += result.failed;
                    progress.duplicates_skipped += result.duplicates;
                    for (entity, stats) in result.stats {
                        let agg = progress.stats_mut(entity);
                        agg.created += stats.created;
                        agg.updated += stats.updated;
                        agg.skipped += stats.skipped;
                        agg.failed += stats.failed;
                    }
                    for entry in result.errors {
                        all_errors.push(entry.clone());
                        progress.push_error(entry);
                    }
                    created.extend(batch_created);
                }
                Err(BatchError::Store(e)) => {
                    if let StoreError::Unavailable(reason) = &e {
                        self.fail_run(run.id, reason).await;
                        return Err(ImportError::Store(e));
                    }
                    warn!(
                        session_id = %run.session_id,
                        batch_index,
                        error = %e,
                        "batch rolled back"
                    );
                    progress.processed_rows += batch.len() as u32;
                    progress.failed_imports += batch.len() as u32;
                    let message = format!("batch rolled back: {e}");
                    let entry = ImportErrorEntry::new(base_row, None, message.clone(), None);
                    all_errors.push(entry.clone());
                    progress.push_error(entry);
                    // A transaction-level failure is fatal too when the run
                    // is not allowed to continue past errors.
                    if !options.continue_on_error {
                        let _ = self.runs.update_progress(run.id, &progress).await;
                        self.fail_run(run.id, &message).await;
                        return Err(ImportError::Aborted {
                            row: base_row,
                            message,
                        });
                    }
                }
                Err(BatchError::RowFatal(entry)) => {
                    let row = entry.row_number;
                    let message = entry.message.clone();
                    all_errors.push(entry.clone());
                    progress.push_error(entry);
                    let _ = self.runs.update_progress(run.id, &progress).await;
                    self.fail_run(run.id, &message).await;
                    return Err(ImportError::Aborted { row, message });
                }
            }

            self.runs.update_progress(run.id, &progress).await?;
            sleep(INTER_BATCH_DELAY).await;
        }

        let report_path = if all_errors.is_empty() {
            None
        } else {
            report::generate(&self.report_dir, &run.session_id, &all_errors)
        };

        let summary = progress.into_summary(report_path);
        self.runs.mark_completed(run.id, &summary).await?;
        info!(
            session_id = %run.session_id,
            successful = summary.successful_imports,
            failed = summary.failed_imports,
            duplicates = summary.duplicates_skipped,
            "import run completed"
        );
        Ok(summary)
    }

    async fn process_batch(
        &self,
        batch: &[Vec<String>],
        base_row: u32,
        owner_id: Uuid,
        entity_mapping: &EntityMapping,
        options: &ImportOptions,
        run_created: &CreatedIndex,
    ) -> Result<(BatchResult, CreatedIndex), BatchError> {
        let mut tx = self.records.begin().await.map_err(BatchError::Store)?;
        let mut result = BatchResult::default();
        let mut batch_created = CreatedIndex::default();

        for (offset, row) in batch.iter().enumerate() {
            let row_number = base_row + offset as u32;
            if let Err(err) = process_row(
                tx.as_mut(),
                row_number,
                row,
                owner_id,
                entity_mapping,
                options,
                run_created,
                &mut batch_created,
                &mut result,
            )
            .await
            {
                let _ = tx.rollback().await;
                return Err(err);
            }
        }

        tx.commit().await.map_err(BatchError::Store)?;
        Ok((result, batch_created))
    }

    async fn fail_run(&self, run_id: Uuid, reason: &str) {
        if let Err(e) = self.runs.mark_failed(run_id, reason).await {
            warn!(%run_id, error = %e, "failed to mark run as failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_row(
    tx: &mut dyn RecordTx,
    row_number: u32,
    row: &[String],
    owner_id: Uuid,
    entity_mapping: &EntityMapping,
    options: &ImportOptions,
    run_created: &CreatedIndex,
    batch_created: &mut CreatedIndex,
    result: &mut BatchResult,
) -> Result<(), BatchError> {
    let mut siblings = SiblingSet::new();

    for entity in EntityType::PROCESSING_ORDER {
        let Some(columns) = entity_mapping.columns_for(entity) else {
            continue;
        };
        let fields = mapping::transform_row(row, columns);

        // No identity data means the row has nothing for this entity.
        if !dedupe::has_identity(entity, &fields) {
            continue;
        }

        match process_entity(
            tx,
            entity,
            fields.clone(),
            owner_id,
            options,
            run_created,
            batch_created,
            &mut siblings,
            result,
        )
        .await
        {
            Ok(()) => {}
            Err(EntityError::Store(e @ StoreError::Unavailable(_))) => {
                return Err(BatchError::Store(e));
            }
            Err(err) => {
                let message = match err {
                    EntityError::Validation(m) => m,
                    EntityError::Store(e) => e.to_string(),
                };
                result.failed += 1;
                result.stats_mut(entity).failed += 1;
                let entry = ImportErrorEntry::new(row_number, Some(entity), message, Some(fields));
                if !options.continue_on_error {
                    return Err(BatchError::RowFatal(entry));
                }
                result.errors.push(entry);
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn process_entity(
    tx: &mut dyn RecordTx,
    entity: EntityType,
    mut fields: FieldMap,
    owner_id: Uuid,
    options: &ImportOptions,
    run_created: &CreatedIndex,
    batch_created: &mut CreatedIndex,
    siblings: &mut SiblingSet,
    result: &mut BatchResult,
) -> Result<(), EntityError> {
    for name in required_fields(entity) {
        if fields.get(*name).is_none_or(FieldValue::is_empty) {
            return Err(EntityError::Validation(format!(
                "missing required field '{name}'"
            )));
        }
    }

    // A record produced earlier in this run is reused as a sibling without
    // touching the duplicate counters.
    if let Some(existing) = batch_created
        .find(entity, owner_id, &fields)
        .or_else(|| run_created.find(entity, owner_id, &fields))
    {
        siblings.insert(entity, existing.clone());
        return Ok(());
    }

    if let Some(query) = dedupe::match_query(entity, owner_id, &fields) {
        if let Some(matched) = tx.find_match(&query).await? {
            match options.duplicate_handling {
                DuplicateHandling::Skip => {
                    result.duplicates += 1;
                    result.stats_mut(entity).skipped += 1;
                    siblings.insert(entity, matched);
                    return Ok(());
                }
                DuplicateHandling::Update => {
                    let mut payload = fields;
                    for key in PROTECTED_FIELDS {
                        payload.remove(key);
                    }
                    let updated = tx.update(&matched, payload).await?;
                    result.successful += 1;
                    result.stats_mut(entity).updated += 1;
                    batch_created.insert(updated.clone());
                    siblings.insert(entity, updated);
                    return Ok(());
                }
                DuplicateHandling::CreateNew => {}
            }
        }
    }

    linker::link(entity, &mut fields, siblings);
    let record = tx.create(entity, owner_id, fields).await?;
    result.successful += 1;
    result.stats_mut(entity).created += 1;
    batch_created.insert(record.clone());
    siblings.insert(entity, record);
    Ok(())
}
