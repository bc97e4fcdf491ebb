//! One open CSV table: row index, sparse x-index, and frozen schema, built
//! together in a single streaming pass and extended in place on tail growth.

use crate::index::{axis_field, count_fields, parse_header, LineScanner, RowIndex, RowSpan};
use crate::reader::{read_axis_values, read_range, ColumnarChunk};
use crate::schema::{infer_schema, TableSchema};
use crate::sparse::{AxisTracker, SparseXIndex};
use crate::DataError;
use csvplot_core::axis::AxisValue;
use csvplot_core::viewport::AxisSpan;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Scan parameters, fixed per open.
#[derive(Debug, Clone, Copy)]
pub struct TableConfig {
    pub sample_rows_min: usize,
    pub sample_ratio: f64,
    pub sparse_stride: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            sample_rows_min: 64,
            sample_ratio: 0.01,
            sparse_stride: 1_000,
        }
    }
}

/// An indexed CSV file with random row access.
#[derive(Debug)]
pub struct CsvTable {
    path: PathBuf,
    config: TableConfig,
    index: RowIndex,
    sparse: SparseXIndex,
    schema: TableSchema,
    last_axis: Option<AxisValue>,
}

impl CsvTable {
    /// Build the row index, sparse x-index, and schema from one sequential
    /// pass plus a bounded prefix re-read for column inference.
    pub fn open(path: &Path, config: TableConfig) -> Result<Self, DataError> {
        let size = fs::metadata(path)?.len();
        if size == 0 {
            return Err(DataError::EmptyFile { path: path.to_path_buf() });
        }

        let mut scanner = LineScanner::open(path, 0)?;
        if !scanner.advance()? {
            return Err(DataError::EmptyFile { path: path.to_path_buf() });
        }
        let header_fields = parse_header(scanner.content())?;
        if header_fields.is_empty() {
            return Err(DataError::NoHeader { path: path.to_path_buf() });
        }
        let header_bytes = scanner.content().to_vec();
        let header_terminated = scanner.terminated();
        let data_start = scanner.end_pos();

        let mut index = RowIndex::new(
            path.to_path_buf(),
            header_fields,
            header_bytes,
            data_start,
            header_terminated,
        );
        let probe_cap = config.sample_rows_min.max(64);
        let mut tracker = AxisTracker::new(config.sparse_stride, probe_cap);
        let mut resume = data_start;
        let mut last_row: Option<Vec<u8>> = None;

        if header_terminated {
            let expected = index.expected_fields();
            while scanner.advance()? {
                if !scanner.terminated() {
                    // Incomplete trailing row; the next scan picks it up.
                    break;
                }
                let content = scanner.content();
                if content.is_empty() {
                    resume = scanner.end_pos();
                    continue;
                }
                let span = RowSpan {
                    offset: scanner.offset(),
                    len: content.len() as u32,
                };
                let well_formed = count_fields(content) == expected;
                let row = index.push(span, well_formed);
                if well_formed {
                    match axis_field(content) {
                        Some(raw) => tracker.observe(row, raw)?,
                        None => index.note_malformed(),
                    }
                }
                last_row = Some(content.to_vec());
                resume = scanner.end_pos();
            }
        }
        index.finish_scan(resume, last_row, size);

        let axis = tracker.finish()?;
        for _ in 0..axis.rejected_rows {
            index.note_malformed();
        }

        let sample_rows = config
            .sample_rows_min
            .max((index.row_count() as f64 * config.sample_ratio).ceil() as usize);
        let schema = infer_schema(&index, axis.kind, sample_rows)?;

        info!(
            path = %path.display(),
            rows = index.row_count(),
            columns = schema.retained().len(),
            axis = %schema.axis_kind(),
            "indexed CSV file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            config,
            index,
            sparse: axis.sparse,
            schema,
            last_axis: axis.last.map(|(_, v)| v),
        })
    }

    /// Resume scanning past the last indexed row after file growth.
    /// Returns the number of newly indexed rows. `ResumeMismatch` means the
    /// file changed underneath the index and a full rebuild is required.
    pub fn append_tail(&mut self) -> Result<usize, DataError> {
        let size = fs::metadata(&self.path)?.len();
        if size < self.index.file_size() || !self.index.header_terminated() {
            return Err(DataError::ResumeMismatch);
        }
        if !self.index.tail_intact()? {
            return Err(DataError::ResumeMismatch);
        }

        // Scan into a local buffer first: an I/O error mid-scan must not
        // leave the index or sparse samples half extended.
        let mut scanner = LineScanner::open(&self.path, self.index.resume_offset())?;
        let expected = self.index.expected_fields();
        let mut scanned: Vec<(RowSpan, bool, Option<String>)> = Vec::new();
        let mut resume = self.index.resume_offset();
        let mut last_row: Option<Vec<u8>> = None;

        while scanner.advance()? {
            if !scanner.terminated() {
                break;
            }
            let content = scanner.content();
            if content.is_empty() {
                resume = scanner.end_pos();
                continue;
            }
            let span = RowSpan {
                offset: scanner.offset(),
                len: content.len() as u32,
            };
            let well_formed = count_fields(content) == expected;
            let axis_raw = if well_formed { axis_field(content) } else { None };
            scanned.push((span, well_formed, axis_raw));
            last_row = Some(content.to_vec());
            resume = scanner.end_pos();
        }

        let added = scanned.len();
        let sparse =
            std::mem::replace(&mut self.sparse, SparseXIndex::new(self.config.sparse_stride));
        let mut tracker =
            AxisTracker::resume(self.schema.axis_kind(), self.last_axis.clone(), sparse);

        for (span, well_formed, axis_raw) in scanned {
            let row = self.index.push(span, well_formed);
            if well_formed {
                match axis_raw {
                    Some(raw) => tracker.observe(row, raw)?,
                    None => self.index.note_malformed(),
                }
            }
        }
        self.index.finish_scan(resume, last_row, size);

        let outcome = tracker.finish()?;
        for _ in 0..outcome.rejected_rows {
            self.index.note_malformed();
        }
        self.sparse = outcome.sparse;
        if let Some((_, value)) = outcome.last {
            self.last_axis = Some(value);
        }

        if added > 0 {
            debug!(added, total = self.index.row_count(), "extended row index");
        }
        Ok(added)
    }

    /// Materialize rows `[row_lo, row_hi)` for the axis plus every retained
    /// column.
    pub fn read_range(&self, row_lo: usize, row_hi: usize) -> Result<ColumnarChunk, DataError> {
        read_range(&self.index, &self.schema, row_lo, row_hi)
    }

    /// Resolve an axis span to exact row bounds: inclusive start, exclusive
    /// end. Unordered (text) axes always resolve to the full range.
    pub fn resolve_range(&self, span: &AxisSpan) -> Result<(usize, usize), DataError> {
        let rows = self.index.row_count();
        if rows == 0 {
            return Ok((0, 0));
        }
        let span = span.clone().normalized();
        if !self.schema.axis_kind().is_ordered() {
            return Ok((0, rows));
        }
        let lo = match &span.start {
            None => 0,
            Some(x) => self.lower_bound(x)?,
        };
        let hi = match &span.end {
            None => rows,
            Some(x) => self.lower_bound(x)?,
        };
        Ok((lo, hi.max(lo)))
    }

    /// First row whose axis value is at or above `target`: a sparse lookup
    /// followed by a bounded linear refinement against the file.
    fn lower_bound(&self, target: &AxisValue) -> Result<usize, DataError> {
        let rows = self.index.row_count();
        let guess = self.sparse.locate(target);
        let window_end = self.sparse.refine_end(target, rows);
        let values = read_axis_values(&self.index, self.schema.axis_kind(), guess, window_end)?;
        for (row, value) in &values {
            if !value.is_before(target) {
                return Ok(*row);
            }
        }
        Ok(window_end)
    }

    /// Error when the file has a header but no data rows. An empty body is
    /// otherwise legal.
    pub fn ensure_non_empty(&self) -> Result<(), DataError> {
        if self.index.is_empty() {
            return Err(DataError::NoDataRows {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Confirm the header and last indexed row still match the file bytes.
    pub fn tail_intact(&self) -> Result<bool, DataError> {
        self.index.tail_intact()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn sparse(&self) -> &SparseXIndex {
        &self.sparse
    }

    pub fn total_rows(&self) -> usize {
        self.index.row_count()
    }

    pub fn malformed_rows(&self) -> usize {
        self.index.malformed_rows()
    }

    /// Axis values of the first and last indexed rows.
    pub fn axis_range(&self) -> Option<(AxisValue, AxisValue)> {
        let first = self.sparse.first()?.0.clone();
        let last = self.sparse.last()?.0.clone();
        Some((first, last))
    }

    /// Axis value of the last indexed row.
    pub fn last_axis(&self) -> Option<&AxisValue> {
        self.last_axis.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::QualityIssue;
    use arrow::array::{Array, Float32Array, Float64Array, Int64Array};
    use csvplot_core::axis::AxisKind;
    use csvplot_core::AxisValue;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn open(file: &NamedTempFile) -> CsvTable {
        CsvTable::open(file.path(), TableConfig::default()).unwrap()
    }

    fn int(v: i64) -> AxisValue {
        AxisValue::Integer(v)
    }

    #[test]
    fn basic_open() {
        let file = write_file("t,a,b\n0,1.0,2.0\n1,1.5,2.5\n2,2.0,3.0\n");
        let table = open(&file);
        assert_eq!(table.total_rows(), 3);
        assert_eq!(table.malformed_rows(), 0);
        assert_eq!(table.schema().axis_kind(), AxisKind::Integer);
        assert_eq!(table.schema().column_names(), vec!["a", "b"]);
        assert_eq!(table.axis_range(), Some((int(0), int(2))));
    }

    #[test]
    fn read_range_materializes_values() {
        let file = write_file("t,a,b\n0,1.0,2.0\n1,1.5,2.5\n2,2.0,3.0\n");
        let table = open(&file);
        let chunk = table.read_range(0, 3).unwrap();
        assert_eq!(chunk.num_rows(), 3);
        assert_eq!(chunk.rows, vec![0, 1, 2]);

        let axis = chunk
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(axis.values().as_ref(), &[0i64, 1, 2]);

        let a = chunk
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<Float32Array>()
            .unwrap();
        assert_eq!(a.values().as_ref(), &[1.0f32, 1.5, 2.0]);
    }

    #[test]
    fn mixed_terminators_index_cleanly() {
        let file = write_file("t,a\r\n0,1\n1,2\r\n2,3\n");
        let table = open(&file);
        assert_eq!(table.total_rows(), 3);
        assert_eq!(table.malformed_rows(), 0);
        let chunk = table.read_range(0, 3).unwrap();
        assert_eq!(chunk.num_rows(), 3);
    }

    #[test]
    fn wrong_field_count_is_indexed_but_skipped_at_read() {
        let file = write_file("t,a\n0,1\n1,2,junk\n2,3\n");
        let table = open(&file);
        // The bad row still occupies a row slot.
        assert_eq!(table.total_rows(), 3);
        assert_eq!(table.malformed_rows(), 1);
        let chunk = table.read_range(0, 3).unwrap();
        assert_eq!(chunk.num_rows(), 2);
        assert_eq!(chunk.malformed_rows, 1);
        assert_eq!(chunk.rows, vec![0, 2]);
    }

    #[test]
    fn trailing_partial_line_is_not_indexed() {
        let file = write_file("t,a\n0,1\n1,2\n2,");
        let table = open(&file);
        assert_eq!(table.total_rows(), 2);
        // The partial line's offset is the resume point.
        assert_eq!(table.index().resume_offset(), 12);
    }

    #[test]
    fn append_extends_offsets_as_a_prefix() {
        let mut file = write_file("t,a\n0,1\n1,2\n");
        let mut table = open(&file);
        let before: Vec<_> = table.index().spans().to_vec();

        file.write_all(b"2,3\n3,4\n").unwrap();
        file.flush().unwrap();
        let added = table.append_tail().unwrap();
        assert_eq!(added, 2);
        assert_eq!(table.total_rows(), 4);
        assert_eq!(&table.index().spans()[..before.len()], before.as_slice());
        assert_eq!(table.axis_range(), Some((int(0), int(3))));

        // Reopening from scratch yields the identical row index. (The sparse
        // index may differ by an extra pinned sample from the earlier scan.)
        let fresh = open(&file);
        assert_eq!(fresh.index().spans(), table.index().spans());
        assert_eq!(fresh.axis_range(), table.axis_range());
    }

    #[test]
    fn reopen_of_unchanged_file_is_identical() {
        let file = write_file("t,a\n0,1\n1,2\n2,3\n");
        let first = open(&file);
        let second = open(&file);
        assert_eq!(first.index().spans(), second.index().spans());
        assert_eq!(first.sparse().samples(), second.sparse().samples());
        assert_eq!(first.schema().column_names(), second.schema().column_names());
        assert_eq!(first.total_rows(), second.total_rows());
    }

    #[test]
    fn append_picks_up_completed_partial_line() {
        let mut file = write_file("t,a\n0,1\n1,");
        let mut table = open(&file);
        assert_eq!(table.total_rows(), 1);

        file.write_all(b"2\n2,3\n").unwrap();
        file.flush().unwrap();
        assert_eq!(table.append_tail().unwrap(), 2);
        assert_eq!(table.total_rows(), 3);

        let chunk = table.read_range(0, 3).unwrap();
        let axis = chunk
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(axis.values().as_ref(), &[0i64, 1, 2]);
    }

    #[test]
    fn shrunken_file_signals_rebuild() {
        let file = write_file("t,a\n0,1\n1,2\n2,3\n");
        let mut table = open(&file);
        std::fs::write(file.path(), "t,a\n0,1\n").unwrap();
        assert!(matches!(table.append_tail(), Err(DataError::ResumeMismatch)));
    }

    #[test]
    fn rewritten_tail_signals_rebuild() {
        let file = write_file("t,a\n0,1\n1,2\n");
        let mut table = open(&file);
        // Same length, different bytes in the last indexed row.
        std::fs::write(file.path(), "t,a\n0,1\n9,9\n").unwrap();
        assert!(matches!(table.append_tail(), Err(DataError::ResumeMismatch)));
        assert!(!table.tail_intact().unwrap());
    }

    #[test]
    fn non_monotonic_axis_is_rejected_with_row() {
        let file = write_file("t,a\n0,1\n1,2\n2,3\n1,4\n3,5\n");
        let err = CsvTable::open(file.path(), TableConfig::default()).unwrap_err();
        match err {
            DataError::NonMonotonicAxis { row } => assert_eq!(row, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_axis_values_open_fine() {
        let file = write_file("t,a\n0,1\n0,2\n1,3\n");
        let table = open(&file);
        assert_eq!(table.total_rows(), 3);
    }

    #[test]
    fn empty_body_opens_with_zero_rows() {
        let file = write_file("t,a,b\n");
        let table = open(&file);
        assert_eq!(table.total_rows(), 0);
        assert!(table.axis_range().is_none());
        assert!(matches!(
            table.ensure_non_empty(),
            Err(DataError::NoDataRows { .. })
        ));
        assert_eq!(table.resolve_range(&AxisSpan::full()).unwrap(), (0, 0));
    }

    #[test]
    fn empty_file_and_missing_header_fail() {
        let file = write_file("");
        assert!(matches!(
            CsvTable::open(file.path(), TableConfig::default()),
            Err(DataError::EmptyFile { .. })
        ));

        let file = write_file("\n1,2\n");
        assert!(matches!(
            CsvTable::open(file.path(), TableConfig::default()),
            Err(DataError::NoHeader { .. })
        ));
    }

    #[test]
    fn all_missing_column_is_dropped() {
        let file = write_file("t,a,b\n0,,1\n1,,2\n2,,3\n");
        let table = open(&file);
        assert_eq!(table.schema().column_names(), vec!["b"]);
        assert_eq!(
            table.schema().quality(),
            &[QualityIssue::AllMissing { column: "a".into() }]
        );
    }

    #[test]
    fn mostly_missing_column_is_kept_but_flagged() {
        let file = write_file("t,a\n0,1\n1,\n2,\n3,\n");
        let table = open(&file);
        assert_eq!(table.schema().column_names(), vec!["a"]);
        match &table.schema().quality()[0] {
            QualityIssue::HighMissingRatio { column, ratio } => {
                assert_eq!(column, "a");
                assert!(*ratio > 0.5);
            }
            other => panic!("unexpected issue: {other:?}"),
        }
    }

    #[test]
    fn non_numeric_columns_are_dropped() {
        let file = write_file("t,a,note\n0,1,hello\n1,2,world\n");
        let table = open(&file);
        assert_eq!(table.schema().column_names(), vec!["a"]);
        assert_eq!(
            table.schema().quality(),
            &[QualityIssue::NonNumeric { column: "note".into() }]
        );
    }

    #[test]
    fn no_numeric_columns_fails_open() {
        let file = write_file("t,note\n0,hello\n1,world\n");
        assert!(matches!(
            CsvTable::open(file.path(), TableConfig::default()),
            Err(DataError::NoNumericColumns)
        ));
    }

    #[test]
    fn quoted_fields_parse() {
        let file = write_file("t,a,label\n0,1,\"x, with comma\"\n1,2,\"say \"\"hi\"\"\"\n");
        let table = open(&file);
        // label is non-numeric and dropped; the quoted commas must not split
        // the field count.
        assert_eq!(table.total_rows(), 2);
        assert_eq!(table.malformed_rows(), 0);
        assert_eq!(table.schema().column_names(), vec!["a"]);
    }

    #[test]
    fn missing_float_fields_become_nan() {
        // 0.1 and 0.7 do not round-trip through f32, so the column stays f64.
        let file = write_file("t,a\n0,0.1\n1,\n2,0.7\n");
        let table = open(&file);
        let chunk = table.read_range(0, 3).unwrap();
        let a = chunk
            .batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(a.value(0), 0.1);
        assert!(a.value(1).is_nan());
        assert_eq!(a.value(2), 0.7);
    }

    #[test]
    fn resolve_range_is_half_open() {
        let rows: String = (0..100).map(|i| format!("{i},{}\n", i * 2)).collect();
        let file = write_file(&format!("t,a\n{rows}"));
        let table = open(&file);

        assert_eq!(table.resolve_range(&AxisSpan::full()).unwrap(), (0, 100));
        let span = AxisSpan::range(int(10), int(20));
        assert_eq!(table.resolve_range(&span).unwrap(), (10, 20));
        // Inverted bounds normalize to the full range.
        let span = AxisSpan::range(int(20), int(10));
        assert_eq!(table.resolve_range(&span).unwrap(), (0, 100));
        // Bounds beyond the data clamp to the edges.
        let span = AxisSpan::range(int(-5), int(1_000));
        assert_eq!(table.resolve_range(&span).unwrap(), (0, 100));
    }

    #[test]
    fn resolve_range_duplicates_take_first_match() {
        let file = write_file("t,a\n0,1\n5,2\n5,3\n5,4\n9,5\n");
        let table = open(&file);
        let (lo, hi) = table
            .resolve_range(&AxisSpan::range(int(5), int(9)))
            .unwrap();
        assert_eq!((lo, hi), (1, 4));
    }

    #[test]
    fn instant_axis_detection_works() {
        let file = write_file(
            "ts,v\n2024-01-01T00:00:00Z,1\n2024-01-01T00:00:01Z,2\n2024-01-01T00:00:02.5Z,3\n",
        );
        let table = open(&file);
        assert_eq!(table.schema().axis_kind(), AxisKind::Instant);
        let chunk = table.read_range(0, 3).unwrap();
        assert_eq!(chunk.num_rows(), 3);
    }
}
