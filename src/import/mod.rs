//! Bulk data-import engine.
//!
//! Pipeline: [`reader`] parses the uploaded file into rows, [`mapping`]
//! resolves each row into per-entity field maps, [`dedupe`] builds the
//! duplicate probes, [`linker`] wires dependent entities to siblings
//! created earlier in the same row, and [`executor`] drives the whole
//! thing in transactional batches. [`report`] turns the accumulated
//! error list into a downloadable CSV once the run finishes.

pub mod dedupe;
pub mod executor;
pub mod linker;
pub mod mapping;
pub mod reader;
pub mod report;

use thiserror::Error;

use crate::store::StoreError;
use crate::types::ImportRunStatus;

pub use executor::ImportEngine;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("no import run found for session {0}")]
    RunNotFound(String),
    #[error("run {session} cannot start importing from status '{status}'")]
    InvalidStatus {
        session: String,
        status: ImportRunStatus,
    },
    #[error("no column mapping saved for session {0}")]
    MappingMissing(String),
    #[error("unsupported file format '{0}'")]
    UnsupportedFormat(String),
    #[error("file has no data rows")]
    EmptyFile,
    #[error("failed to read import file: {0}")]
    FileRead(String),
    #[error("import aborted at row {row}: {message}")]
    Aborted { row: u32, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
