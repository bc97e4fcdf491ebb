//! Core functionality for the csvplot streaming engine
//!
//! This crate provides the fundamental abstractions shared by the data,
//! series, and engine crates: the axis value model, the viewport record,
//! the fetch coordination state machine, and follow-mode bookkeeping.

pub mod axis;
pub mod coordinator;
pub mod follow;
pub mod options;
pub mod payload;
pub mod viewport;

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the engine facade.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("CSV file is empty: {0}")]
    EmptyFile(PathBuf),

    #[error("CSV file has no header: {0}")]
    NoHeader(PathBuf),

    #[error("no numeric columns remain after filtering")]
    NoNumericColumns,

    #[error("CSV file has no data rows: {0}")]
    NoDataRows(PathBuf),

    #[error("axis is not monotonically ascending at row {row}")]
    NonMonotonicAxis { row: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine handle is closed")]
    Closed,

    #[error("data error: {0}")]
    Data(String),
}

// Re-export commonly used types
pub use axis::{AxisKind, AxisValue};
pub use coordinator::{Coordinator, CoordinatorAction, FetchPhase};
pub use follow::{tail_threshold_rows, viewport_at_tail, FollowerState, PollObservation};
pub use options::EngineOptions;
pub use payload::{DiscardReason, EngineEvent, TraceBundle, TraceSeries, ViewportWindow};
pub use viewport::{AxisSpan, Viewport};
