//! Viewport model: the half-open axis interval the user currently sees.

use crate::axis::AxisValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A half-open axis interval `[start, end)`. `None` bounds extend to the
/// corresponding edge of the data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisSpan {
    pub start: Option<AxisValue>,
    pub end: Option<AxisValue>,
}

impl AxisSpan {
    /// The full data range.
    pub fn full() -> Self {
        AxisSpan { start: None, end: None }
    }

    pub fn range(start: AxisValue, end: AxisValue) -> Self {
        AxisSpan { start: Some(start), end: Some(end) }
    }

    /// Everything from `start` to the end of the data.
    pub fn from_start(start: AxisValue) -> Self {
        AxisSpan { start: Some(start), end: None }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// An empty interval (start >= end) normalizes to the full range.
    pub fn normalized(self) -> Self {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            match start.compare(end) {
                Some(Ordering::Less) => self,
                _ => AxisSpan::full(),
            }
        } else {
            self
        }
    }
}

/// A versioned viewport. `version` increments on every user change;
/// `epoch` increments whenever a reopen or rebuild invalidates prior results.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub span: AxisSpan,
    pub version: u64,
    pub epoch: u64,
}
