//! Callback payloads delivered to the presentation layer.

use crate::axis::AxisValue;
use serde::{Deserialize, Serialize};

/// One display series for a retained numeric column.
///
/// Trace identity across updates is `(name, epoch)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSeries {
    pub name: String,
    pub xs: Vec<AxisValue>,
    pub ys: Vec<f64>,
    /// True when `ys` contains NaN gaps. Renderers are contractually
    /// required to break the line there, never to connect across them.
    pub gaps_present: bool,
}

/// The materialized window echoed with a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportWindow {
    pub x_start: Option<AxisValue>,
    pub x_end: Option<AxisValue>,
    /// The request exceeded the fetch window and was narrowed to its most
    /// recent rows.
    pub clipped: bool,
}

/// A successful viewport result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceBundle {
    pub token: u64,
    pub epoch: u64,
    pub viewport: ViewportWindow,
    pub traces: Vec<TraceSeries>,
    pub total_rows: usize,
    pub malformed_rows: usize,
}

/// Why a requested version never produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// A newer viewport version superseded this request.
    Superseded,
    /// The file was reopened or rebuilt; prior results are invalid.
    EpochChanged,
    /// The fetch failed on disk I/O.
    Io(String),
}

/// Event stream delivered through the callback registered at open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    Result(TraceBundle),
    Discarded {
        token: u64,
        epoch: u64,
        reason: DiscardReason,
    },
}
