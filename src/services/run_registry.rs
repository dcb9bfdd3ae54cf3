//! Run registry service
//!
//! Injected in-memory history of recently finished import runs. Bounded
//! and TTL-evicted; the durable record stays in the `import_runs` table,
//! this only feeds the cheap `import.history` query path.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::RunSummary;

const MAX_HISTORY_SIZE: usize = 100;
const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistoryEntry {
    pub session_id: String,
    pub owner_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistoryResponse {
    pub runs: Vec<RunHistoryEntry>,
    pub total: usize,
}

#[derive(Clone)]
pub struct RunRegistry {
    entries: Arc<RwLock<VecDeque<RunHistoryEntry>>>,
    ttl: Duration,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(DEFAULT_TTL_HOURS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_HISTORY_SIZE))),
            ttl,
        }
    }

    pub fn record_completed(
        &self,
        session_id: &str,
        owner_id: Uuid,
        summary: RunSummary,
        duration_ms: u64,
    ) {
        self.add(RunHistoryEntry {
            session_id: session_id.to_string(),
            owner_id,
            status: "completed".to_string(),
            summary: Some(summary),
            error: None,
            finished_at: Utc::now(),
            duration_ms,
        });
    }

    pub fn record_failed(&self, session_id: &str, owner_id: Uuid, error: String, duration_ms: u64) {
        self.add(RunHistoryEntry {
            session_id: session_id.to_string(),
            owner_id,
            status: "failed".to_string(),
            summary: None,
            error: Some(error),
            finished_at: Utc::now(),
            duration_ms,
        });
    }

    /// Recent runs for one owner, newest first.
    pub fn recent_for_owner(&self, owner_id: Uuid, limit: usize) -> RunHistoryResponse {
        let mut entries = self.entries.write();
        self.evict_expired(&mut entries);
        let mut runs = Vec::new();
        let mut total = 0;
        for entry in entries.iter().filter(|e| e.owner_id == owner_id) {
            total += 1;
            if runs.len() < limit {
                runs.push(entry.clone());
            }
        }
        RunHistoryResponse { runs, total }
    }

    fn add(&self, entry: RunHistoryEntry) {
        let mut entries = self.entries.write();
        self.evict_expired(&mut entries);
        if entries.len() >= MAX_HISTORY_SIZE {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    fn evict_expired(&self, entries: &mut VecDeque<RunHistoryEntry>) {
        let cutoff = Utc::now() - self.ttl;
        entries.retain(|e| e.finished_at > cutoff);
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn summary() -> RunSummary {
        RunSummary {
            total_rows: 2,
            processed_rows: 2,
            successful_imports: 2,
            failed_imports: 0,
            duplicates_skipped: 0,
            entity_stats: BTreeMap::new(),
            error_report_path: None,
        }
    }

    #[test]
    fn test_record_and_query() {
        let registry = RunRegistry::new();
        let owner = Uuid::new_v4();
        registry.record_completed("s-1", owner, summary(), 120);
        registry.record_failed("s-2", owner, "boom".to_string(), 30);

        let history = registry.recent_for_owner(owner, 10);
        assert_eq!(history.total, 2);
        // Newest first.
        assert_eq!(history.runs[0].session_id, "s-2");
        assert_eq!(history.runs[0].status, "failed");
        assert_eq!(history.runs[1].status, "completed");
    }

    #[test]
    fn test_owners_are_isolated() {
        let registry = RunRegistry::new();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        registry.record_completed("s-a", owner_a, summary(), 10);
        registry.record_completed("s-b", owner_b, summary(), 10);

        let history = registry.recent_for_owner(owner_a, 10);
        assert_eq!(history.total, 1);
        assert_eq!(history.runs[0].session_id, "s-a");
    }

    #[test]
    fn test_history_is_capped() {
        let registry = RunRegistry::new();
        let owner = Uuid::new_v4();
        for i in 0..150 {
            registry.record_completed(&format!("s-{i}"), owner, summary(), 1);
        }
        let history = registry.recent_for_owner(owner, 200);
        assert_eq!(history.total, MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_total_counts_past_the_page_limit() {
        let registry = RunRegistry::new();
        let owner = Uuid::new_v4();
        for i in 0..5 {
            registry.record_completed(&format!("s-{i}"), owner, summary(), 1);
        }
        let history = registry.recent_for_owner(owner, 2);
        assert_eq!(history.runs.len(), 2);
        assert_eq!(history.total, 5);
    }

    #[test]
    fn test_expired_entries_evicted() {
        let registry = RunRegistry::with_ttl(Duration::zero());
        let owner = Uuid::new_v4();
        registry.record_completed("s-old", owner, summary(), 1);

        let history = registry.recent_for_owner(owner, 10);
        assert_eq!(history.total, 0);
    }
}
