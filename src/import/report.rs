//! Error report generation.
//!
//! Writes the full error list of a finished run to a CSV file. A write
//! failure is logged and swallowed; a missing report must not fail an
//! otherwise successful import.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::types::ImportErrorEntry;

/// Returns the report path, or `None` if writing failed.
pub fn generate(dir: &str, session_id: &str, errors: &[ImportErrorEntry]) -> Option<String> {
    match write_report(dir, session_id, errors) {
        Ok(path) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            warn!(session_id, error = %e, "failed to write import error report");
            None
        }
    }
}

fn write_report(
    dir: &str,
    session_id: &str,
    errors: &[ImportErrorEntry],
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = Path::new(dir).join(format!("import-errors-{session_id}.csv"));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["row", "entity", "error", "timestamp", "data"])?;
    for entry in errors {
        writer.write_record([
            entry.row_number.to_string(),
            entry
                .entity_type
                .map(|e| e.to_string())
                .unwrap_or_default(),
            entry.message.clone(),
            entry.timestamp.to_rfc3339(),
            entry
                .data
                .as_ref()
                .and_then(|d| serde_json::to_string(d).ok())
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, FieldMap, FieldValue};

    #[test]
    fn test_report_written_with_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = FieldMap::new();
        data.insert("email".to_string(), FieldValue::from("bad"));
        let errors = vec![
            ImportErrorEntry::new(2, Some(EntityType::Person), "missing required field", Some(data)),
            ImportErrorEntry::new(5, None, "batch rolled back", None),
        ];

        let path = generate(dir.path().to_str().unwrap(), "sess-1", &errors).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "row,entity,error,timestamp,data");
        let first = lines.next().unwrap();
        assert!(first.starts_with("2,person,missing required field,"));
        assert!(first.contains("email"));
        assert!(lines.next().unwrap().starts_with("5,,batch rolled back,"));
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("reports/imports");
        let path = generate(nested.to_str().unwrap(), "sess-2", &[]).unwrap();
        assert!(Path::new(&path).exists());
    }

    #[test]
    fn test_unwritable_directory_returns_none() {
        assert!(generate("/proc/no-such-place", "sess-3", &[]).is_none());
    }
}
