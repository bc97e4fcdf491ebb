//! Sparse x-index: periodic `(axis value, row)` samples enabling O(log n)
//! axis-to-row lookup without scanning the file.

use crate::DataError;
use csvplot_core::axis::{AxisKind, AxisValue};
use std::cmp::Ordering;

pub const DEFAULT_SPARSE_STRIDE: usize = 1_000;

/// Strictly row-ordered samples mapping axis values back to row positions.
/// Axis values are non-decreasing; duplicates are allowed. The first and
/// last indexed rows are always present.
#[derive(Debug, Clone)]
pub struct SparseXIndex {
    samples: Vec<(AxisValue, usize)>,
    stride: usize,
}

impl SparseXIndex {
    pub fn new(stride: usize) -> Self {
        Self {
            samples: Vec::new(),
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[(AxisValue, usize)] {
        &self.samples
    }

    pub fn first(&self) -> Option<&(AxisValue, usize)> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&(AxisValue, usize)> {
        self.samples.last()
    }

    /// Row of the greatest sample at or below `target`, first match on
    /// duplicates. Targets before the first sample map to row 0.
    pub fn locate(&self, target: &AxisValue) -> usize {
        let idx = self
            .samples
            .partition_point(|(v, _)| matches!(v.compare(target), Some(Ordering::Less)));
        if let Some((v, row)) = self.samples.get(idx) {
            if v.compare(target) == Some(Ordering::Equal) {
                return *row;
            }
        }
        if idx == 0 {
            0
        } else {
            self.samples[idx - 1].1
        }
    }

    /// Exclusive end of the linear refinement window for `target`: one past
    /// the row of the first sample strictly greater than it.
    pub fn refine_end(&self, target: &AxisValue, total_rows: usize) -> usize {
        let idx = self
            .samples
            .partition_point(|(v, _)| !matches!(v.compare(target), Some(Ordering::Greater)));
        self.samples
            .get(idx)
            .map(|(_, row)| (*row + 1).min(total_rows))
            .unwrap_or(total_rows)
    }

    /// Sample every `stride` rows; the first observed row is always kept.
    pub(crate) fn observe(&mut self, row: usize, value: AxisValue) {
        if self.samples.is_empty() || row % self.stride == 0 {
            self.push(value, row);
        }
    }

    /// Pin a row so lookups always cover the tail.
    pub(crate) fn pin_last(&mut self, row: usize, value: AxisValue) {
        self.push(value, row);
    }

    fn push(&mut self, value: AxisValue, row: usize) {
        if let Some((_, last_row)) = self.samples.last() {
            if row <= *last_row {
                return;
            }
        }
        self.samples.push((value, row));
    }
}

/// Scan-time axis bookkeeping: buffers a raw prefix until the axis kind can
/// be fixed, then parses every subsequent value, enforces monotonic ascent,
/// and feeds the sparse index.
pub(crate) struct AxisTracker {
    probe_cap: usize,
    pending: Vec<(usize, String)>,
    kind: Option<AxisKind>,
    prev: Option<AxisValue>,
    last: Option<(usize, AxisValue)>,
    sparse: SparseXIndex,
    /// Open-time scans reject the file on regression; tail appends instead
    /// count the row as malformed (the schema is frozen by then).
    reject_on_regress: bool,
    rejected_rows: usize,
}

#[derive(Debug)]
pub(crate) struct AxisOutcome {
    pub kind: AxisKind,
    pub sparse: SparseXIndex,
    pub last: Option<(usize, AxisValue)>,
    pub rejected_rows: usize,
}

impl AxisTracker {
    pub(crate) fn new(stride: usize, probe_cap: usize) -> Self {
        Self {
            probe_cap: probe_cap.max(1),
            pending: Vec::new(),
            kind: None,
            prev: None,
            last: None,
            sparse: SparseXIndex::new(stride),
            reject_on_regress: true,
            rejected_rows: 0,
        }
    }

    /// Continue tracking an already-open table during tail growth.
    pub(crate) fn resume(
        kind: AxisKind,
        prev: Option<AxisValue>,
        sparse: SparseXIndex,
    ) -> Self {
        Self {
            probe_cap: 1,
            pending: Vec::new(),
            kind: Some(kind),
            prev,
            last: None,
            sparse,
            reject_on_regress: false,
            rejected_rows: 0,
        }
    }

    pub(crate) fn observe(&mut self, row: usize, raw: String) -> Result<(), DataError> {
        match self.kind {
            None => {
                self.pending.push((row, raw));
                if self.pending.len() >= self.probe_cap {
                    self.fix_kind()?;
                }
                Ok(())
            }
            Some(kind) => self.track(kind, row, &raw),
        }
    }

    fn track(&mut self, kind: AxisKind, row: usize, raw: &str) -> Result<(), DataError> {
        let value = match AxisValue::parse(kind, raw) {
            Some(v) => v,
            None => {
                self.rejected_rows += 1;
                return Ok(());
            }
        };
        if let Some(prev) = &self.prev {
            if value.is_before(prev) {
                if self.reject_on_regress {
                    return Err(DataError::NonMonotonicAxis { row });
                }
                self.rejected_rows += 1;
                return Ok(());
            }
        }
        self.sparse.observe(row, value.clone());
        self.prev = Some(value.clone());
        self.last = Some((row, value));
        Ok(())
    }

    fn fix_kind(&mut self) -> Result<(), DataError> {
        let kind = AxisKind::probe(self.pending.iter().map(|(_, raw)| raw.as_str()));
        self.kind = Some(kind);
        for (row, raw) in std::mem::take(&mut self.pending) {
            self.track(kind, row, &raw)?;
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<AxisOutcome, DataError> {
        if self.kind.is_none() {
            self.fix_kind()?;
        }
        if let Some((row, value)) = &self.last {
            self.sparse.pin_last(*row, value.clone());
        }
        Ok(AxisOutcome {
            kind: self.kind.expect("kind fixed above"),
            sparse: self.sparse,
            last: self.last,
            rejected_rows: self.rejected_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> AxisValue {
        AxisValue::Integer(v)
    }

    fn build_sparse(stride: usize, values: &[i64]) -> SparseXIndex {
        let mut tracker = AxisTracker::new(stride, 4);
        for (row, v) in values.iter().enumerate() {
            tracker.observe(row, v.to_string()).unwrap();
        }
        tracker.finish().unwrap().sparse
    }

    #[test]
    fn samples_every_stride_plus_last() {
        let values: Vec<i64> = (0..25).map(|i| i * 10).collect();
        let sparse = build_sparse(10, &values);
        let rows: Vec<usize> = sparse.samples().iter().map(|(_, r)| *r).collect();
        assert_eq!(rows, vec![0, 10, 20, 24]);
    }

    #[test]
    fn locate_returns_greatest_at_or_below() {
        let values: Vec<i64> = (0..25).map(|i| i * 10).collect();
        let sparse = build_sparse(10, &values);
        assert_eq!(sparse.locate(&int(0)), 0);
        assert_eq!(sparse.locate(&int(95)), 0);
        assert_eq!(sparse.locate(&int(100)), 10);
        assert_eq!(sparse.locate(&int(199)), 10);
        assert_eq!(sparse.locate(&int(200)), 20);
        assert_eq!(sparse.locate(&int(10_000)), 24);
        // Before the first sample.
        assert_eq!(sparse.locate(&int(-5)), 0);
    }

    #[test]
    fn locate_duplicates_first_match() {
        let mut tracker = AxisTracker::new(1, 2);
        for (row, v) in [1i64, 5, 5, 5, 9].iter().enumerate() {
            tracker.observe(row, v.to_string()).unwrap();
        }
        let sparse = tracker.finish().unwrap().sparse;
        assert_eq!(sparse.locate(&int(5)), 1);
    }

    #[test]
    fn refine_end_bounds_the_scan() {
        let values: Vec<i64> = (0..25).map(|i| i * 10).collect();
        let sparse = build_sparse(10, &values);
        // First sample above 95 sits at row 10 (value 100).
        assert_eq!(sparse.refine_end(&int(95), 25), 11);
        assert_eq!(sparse.refine_end(&int(240), 25), 25);
    }

    #[test]
    fn tracker_rejects_regressions_at_open() {
        let mut tracker = AxisTracker::new(1_000, 64);
        for (row, v) in [0i64, 1, 2, 1, 3].iter().enumerate() {
            let result = tracker.observe(row, v.to_string());
            if row < 4 {
                if let Err(e) = result {
                    panic!("unexpected error before finish: {e}");
                }
            }
        }
        let err = tracker.finish().unwrap_err();
        match err {
            DataError::NonMonotonicAxis { row } => assert_eq!(row, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tracker_tolerates_regressions_on_resume() {
        let mut tracker =
            AxisTracker::resume(AxisKind::Integer, Some(int(10)), SparseXIndex::new(2));
        tracker.observe(10, "9".into()).unwrap();
        tracker.observe(11, "12".into()).unwrap();
        let outcome = tracker.finish().unwrap();
        assert_eq!(outcome.rejected_rows, 1);
        assert_eq!(outcome.last.as_ref().map(|(r, _)| *r), Some(11));
    }

    #[test]
    fn duplicate_axis_values_are_allowed() {
        let mut tracker = AxisTracker::new(1, 2);
        for (row, v) in [3i64, 3, 3].iter().enumerate() {
            tracker.observe(row, v.to_string()).unwrap();
        }
        assert!(tracker.finish().is_ok());
    }
}
