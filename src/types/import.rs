//! Import run types: lifecycle, options, counters, error log entries

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::import::mapping::ColumnTarget;

use super::record::{EntityType, FieldMap};

/// Most recent error entries kept on the live run record. The full list is
/// preserved in memory for the terminal error report.
pub const ERROR_LOG_CAP: usize = 100;

/// Lifecycle of an import run. Only moves forward, except that any
/// in-progress state may fall to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportRunStatus {
    Mapping,
    Validated,
    Importing,
    Completed,
    Failed,
}

impl ImportRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportRunStatus::Mapping => "mapping",
            ImportRunStatus::Validated => "validated",
            ImportRunStatus::Importing => "importing",
            ImportRunStatus::Completed => "completed",
            ImportRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ImportRunStatus> {
        match s {
            "mapping" => Some(ImportRunStatus::Mapping),
            "validated" => Some(ImportRunStatus::Validated),
            "importing" => Some(ImportRunStatus::Importing),
            "completed" => Some(ImportRunStatus::Completed),
            "failed" => Some(ImportRunStatus::Failed),
            _ => None,
        }
    }

    /// Only runs with a saved mapping that have not started yet may enter
    /// `importing`.
    pub fn can_start_import(&self) -> bool {
        matches!(self, ImportRunStatus::Mapping | ImportRunStatus::Validated)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportRunStatus::Completed | ImportRunStatus::Failed)
    }
}

impl std::fmt::Display for ImportRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when an incoming row matches an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandling {
    Skip,
    Update,
    CreateNew,
}

/// Options supplied when a run is started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    #[serde(default = "default_duplicate_handling")]
    pub duplicate_handling: DuplicateHandling,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

fn default_duplicate_handling() -> DuplicateHandling {
    DuplicateHandling::Skip
}

fn default_batch_size() -> usize {
    50
}

fn default_continue_on_error() -> bool {
    true
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            duplicate_handling: default_duplicate_handling(),
            batch_size: default_batch_size(),
            continue_on_error: default_continue_on_error(),
        }
    }
}

/// One structured row-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportErrorEntry {
    /// 1-based spreadsheet row (header is row 1, so data row 1 is row 2).
    pub row_number: u32,
    pub entity_type: Option<EntityType>,
    pub message: String,
    /// The offending field data, as extracted for this entity.
    pub data: Option<FieldMap>,
    pub timestamp: DateTime<Utc>,
}

impl ImportErrorEntry {
    pub fn new(
        row_number: u32,
        entity_type: Option<EntityType>,
        message: impl Into<String>,
        data: Option<FieldMap>,
    ) -> Self {
        Self {
            row_number,
            entity_type,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Per-entity-type counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// One file-import attempt, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: Uuid,
    /// Opaque, client-supplied session identifier.
    pub session_id: String,
    pub owner_id: Uuid,
    pub file_path: String,
    pub file_type: String,
    /// Column index → target, as saved by the mapping step.
    pub column_mapping: Option<BTreeMap<u32, ColumnTarget>>,
    pub status: ImportRunStatus,
    pub total_rows: u32,
    pub processed_rows: u32,
    pub successful_imports: u32,
    pub failed_imports: u32,
    pub duplicates_skipped: u32,
    /// 0–100.
    pub progress: u32,
    /// Capped at [`ERROR_LOG_CAP`] entries, most recent kept.
    pub error_log: Vec<ImportErrorEntry>,
    pub entity_stats: BTreeMap<EntityType, EntityStats>,
    pub options: Option<ImportOptions>,
    pub error_report_path: Option<String>,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Live counters for a run in progress. Owned by the batch executor (the
/// single writer for its run) and persisted after every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub total_rows: u32,
    pub processed_rows: u32,
    pub successful_imports: u32,
    pub failed_imports: u32,
    pub duplicates_skipped: u32,
    pub entity_stats: BTreeMap<EntityType, EntityStats>,
    /// Live capped log, most recent [`ERROR_LOG_CAP`] entries.
    pub error_log: Vec<ImportErrorEntry>,
}

impl RunProgress {
    pub fn new(total_rows: u32) -> Self {
        Self {
            total_rows,
            processed_rows: 0,
            successful_imports: 0,
            failed_imports: 0,
            duplicates_skipped: 0,
            entity_stats: BTreeMap::new(),
            error_log: Vec::new(),
        }
    }

    pub fn percent(&self) -> u32 {
        if self.total_rows == 0 {
            return 100;
        }
        (self.processed_rows as u64 * 100 / self.total_rows as u64) as u32
    }

    /// Append an error, dropping the oldest entry once the cap is reached.
    pub fn push_error(&mut self, entry: ImportErrorEntry) {
        if self.error_log.len() >= ERROR_LOG_CAP {
            self.error_log.remove(0);
        }
        self.error_log.push(entry);
    }

    pub fn stats_mut(&mut self, entity: EntityType) -> &mut EntityStats {
        self.entity_stats.entry(entity).or_default()
    }

    pub fn into_summary(self, error_report_path: Option<String>) -> RunSummary {
        RunSummary {
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            successful_imports: self.successful_imports,
            failed_imports: self.failed_imports,
            duplicates_skipped: self.duplicates_skipped,
            entity_stats: self.entity_stats,
            error_report_path,
        }
    }
}

/// Final counters reported when a run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_rows: u32,
    pub processed_rows: u32,
    pub successful_imports: u32,
    pub failed_imports: u32,
    pub duplicates_skipped: u32,
    pub entity_stats: BTreeMap<EntityType, EntityStats>,
    pub error_report_path: Option<String>,
}

// ==========================================================================
// Run job messages (NATS surface)
// ==========================================================================

/// Request payload for `leadline.import.execute` (single-entity run) and
/// `leadline.import.finish` (multi-entity run).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportRequest {
    pub session_id: String,
    /// Restrict the run to one entity type (`execute`); `None` for `finish`.
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub options: Option<ImportOptions>,
}

/// Request payload for `leadline.import.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusRequest {
    pub session_id: String,
}

/// Request payload for `leadline.import.history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistoryRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// 202-style reply: the run was queued, progress is polled separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitResponse {
    pub session_id: String,
    pub message: String,
}

/// A queued import run job on the work-queue stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRunJob {
    pub id: Uuid,
    pub session_id: String,
    pub entity_type: Option<EntityType>,
    pub options: ImportOptions,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedRunJob {
    pub fn new(session_id: String, entity_type: Option<EntityType>, options: ImportOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            entity_type,
            options,
            submitted_at: Utc::now(),
        }
    }
}

/// Status update published on `leadline.run.import.status.{session}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunStatusUpdate {
    #[serde(rename_all = "camelCase")]
    Queued { session_id: String },
    #[serde(rename_all = "camelCase")]
    Started { session_id: String },
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: String,
        summary: RunSummary,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Failed { session_id: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_forward_only() {
        assert!(ImportRunStatus::Mapping.can_start_import());
        assert!(ImportRunStatus::Validated.can_start_import());
        assert!(!ImportRunStatus::Importing.can_start_import());
        assert!(!ImportRunStatus::Completed.can_start_import());
        assert!(!ImportRunStatus::Failed.can_start_import());
    }

    #[test]
    fn test_status_terminal() {
        assert!(ImportRunStatus::Completed.is_terminal());
        assert!(ImportRunStatus::Failed.is_terminal());
        assert!(!ImportRunStatus::Importing.is_terminal());
    }

    #[test]
    fn test_options_defaults() {
        let opts: ImportOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.duplicate_handling, DuplicateHandling::Skip);
        assert_eq!(opts.batch_size, 50);
        assert!(opts.continue_on_error);
    }

    #[test]
    fn test_duplicate_handling_wire_format() {
        let json = serde_json::to_string(&DuplicateHandling::CreateNew).unwrap();
        assert_eq!(json, "\"create_new\"");
    }

    #[test]
    fn test_run_status_update_serializes() {
        let update = RunStatusUpdate::Started {
            session_id: "s-1".to_string(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("started"));
        assert!(json.contains("sessionId"));
    }
}
