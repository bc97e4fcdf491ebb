//! Data access for the csvplot engine: streaming row indexing, sparse axis
//! lookup, schema inference, and ranged materialization into arrow batches.

pub mod index;
pub mod reader;
pub mod schema;
pub mod sparse;
pub mod table;

use arrow::error::ArrowError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in data operations.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("CSV parsing error: {0}")]
    Csv(String),

    #[error("CSV file is empty: {path}")]
    EmptyFile { path: PathBuf },

    #[error("CSV file has no header: {path}")]
    NoHeader { path: PathBuf },

    #[error("CSV file has no data rows: {path}")]
    NoDataRows { path: PathBuf },

    #[error("no numeric columns remain after filtering")]
    NoNumericColumns,

    #[error("axis value at row {row} is smaller than its predecessor")]
    NonMonotonicAxis { row: usize },

    #[error("file vanished during read: {path}")]
    FileGone { path: PathBuf },

    #[error("read truncated at byte {offset}: expected {expected} bytes, got {got}")]
    TruncatedRead {
        offset: u64,
        expected: usize,
        got: usize,
    },

    #[error("indexed tail no longer matches the file; full rebuild required")]
    ResumeMismatch,

    #[error("row range {lo}..{hi} out of bounds for {rows} rows")]
    RowRange { lo: usize, hi: usize, rows: usize },
}

impl From<csv::Error> for DataError {
    fn from(error: csv::Error) -> Self {
        match error.kind() {
            csv::ErrorKind::Io(_) => {
                DataError::Io(std::io::Error::new(std::io::ErrorKind::Other, error.to_string()))
            }
            _ => DataError::Csv(error.to_string()),
        }
    }
}

// Re-exports
pub use index::{RowIndex, RowSpan};
pub use reader::ColumnarChunk;
pub use schema::{QualityIssue, RetainedColumn, TableSchema};
pub use sparse::SparseXIndex;
pub use table::{CsvTable, TableConfig};
