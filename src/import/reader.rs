//! Tabular file reader: CSV via the `csv` crate, XLSX via `calamine`.
//!
//! The header row fixes the row width and is discarded; short rows are
//! padded so column indices from the saved mapping always resolve.

use calamine::{open_workbook_auto, Data, Reader};

use super::ImportError;

/// Read all data rows of `path`. Fully materialized; the executor slices
/// the result into batches afterwards.
pub fn read_rows(path: &str, file_type: &str) -> Result<Vec<Vec<String>>, ImportError> {
    match file_type.to_ascii_lowercase().as_str() {
        "csv" => read_csv(path),
        "xlsx" => read_xlsx(path),
        other => Err(ImportError::UnsupportedFormat(other.to_string())),
    }
}

fn read_csv(path: &str) -> Result<Vec<Vec<String>>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ImportError::FileRead(e.to_string()))?;
    let width = reader
        .headers()
        .map_err(|e| ImportError::FileRead(e.to_string()))?
        .len();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ImportError::FileRead(e.to_string()))?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.len() < width {
            row.resize(width, String::new());
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    Ok(rows)
}

fn read_xlsx(path: &str) -> Result<Vec<Vec<String>>, ImportError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| ImportError::FileRead(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::FileRead("workbook has no sheets".to_string()))?
        .map_err(|e| ImportError::FileRead(e.to_string()))?;

    let mut cells = range.rows();
    let width = match cells.next() {
        Some(header) => header.len(),
        None => return Err(ImportError::EmptyFile),
    };

    let mut rows = Vec::new();
    for row_cells in cells {
        let mut row: Vec<String> = row_cells.iter().map(cell_to_string).collect();
        if row.len() < width {
            row.resize(width, String::new());
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(ImportError::EmptyFile);
    }
    Ok(rows)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Whole numbers come back from Excel as floats; strip the ".0".
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_csv_header_discarded_and_rows_padded() {
        let file = csv_file("name,email,company\nAlice,a@x.com,Acme\nBob,b@x.com\n");
        let rows = read_rows(file.path().to_str().unwrap(), "csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Alice", "a@x.com", "Acme"]);
        // Short row padded to header width.
        assert_eq!(rows[1], vec!["Bob", "b@x.com", ""]);
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let file = csv_file("name,email\n");
        let err = read_rows(file.path().to_str().unwrap(), "csv").unwrap_err();
        assert!(matches!(err, ImportError::EmptyFile));
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let err = read_rows("/tmp/whatever.pdf", "pdf").unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(f) if f == "pdf"));
    }

    #[test]
    fn test_file_type_case_insensitive() {
        let file = csv_file("a\n1\n");
        let rows = read_rows(file.path().to_str().unwrap(), "CSV").unwrap();
        assert_eq!(rows, vec![vec!["1".to_string()]]);
    }
}
