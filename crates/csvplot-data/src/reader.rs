//! Ranged materialization: seek to a row span, read exactly its bytes, and
//! parse them into typed arrow arrays.
//!
//! Each read opens its own file handle; nothing long-lived is kept. Rows
//! whose field count does not match the schema, or whose axis value does not
//! parse (or regresses), drop out of the chunk and are counted instead.

use crate::index::{axis_field, RowIndex};
use crate::schema::TableSchema;
use crate::DataError;
use arrow::array::{
    ArrayRef, Float32Builder, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
    TimestampNanosecondBuilder,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use csvplot_core::axis::{AxisKind, AxisValue};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A materialized half-open row range.
#[derive(Debug, Clone)]
pub struct ColumnarChunk {
    /// Axis column followed by one array per retained numeric column.
    pub batch: RecordBatch,
    /// First requested row of the range.
    pub first_row: usize,
    /// Absolute source row of each batch row (skipped rows drop out).
    pub rows: Vec<usize>,
    /// Rows skipped within this range.
    pub malformed_rows: usize,
}

impl ColumnarChunk {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

pub(crate) fn read_range(
    index: &RowIndex,
    schema: &TableSchema,
    row_lo: usize,
    row_hi: usize,
) -> Result<ColumnarChunk, DataError> {
    let rows = index.row_count();
    if row_lo > row_hi || row_hi > rows {
        return Err(DataError::RowRange { lo: row_lo, hi: row_hi, rows });
    }
    if row_lo == row_hi {
        return Ok(ColumnarChunk {
            batch: RecordBatch::new_empty(schema.arrow()),
            first_row: row_lo,
            rows: Vec::new(),
            malformed_rows: 0,
        });
    }

    let (start, end) = index.byte_range(row_lo, row_hi)?;
    let buf = read_span(index.path(), start, end)?;
    parse_chunk(index, schema, row_lo, row_hi, start, &buf)
}

/// Parse only the axis field of rows `[row_lo, row_hi)`, for the bounded
/// linear refinement after a sparse lookup.
pub(crate) fn read_axis_values(
    index: &RowIndex,
    kind: AxisKind,
    row_lo: usize,
    row_hi: usize,
) -> Result<Vec<(usize, AxisValue)>, DataError> {
    if row_lo >= row_hi {
        return Ok(Vec::new());
    }
    let (start, end) = index.byte_range(row_lo, row_hi)?;
    let buf = read_span(index.path(), start, end)?;

    let mut out = Vec::with_capacity(row_hi - row_lo);
    for (i, span) in index.spans()[row_lo..row_hi].iter().enumerate() {
        let rel = (span.offset - start) as usize;
        let rel_end = (rel + span.len as usize).min(buf.len());
        let Some(raw) = axis_field(&buf[rel..rel_end]) else {
            continue;
        };
        let Some(value) = AxisValue::parse(kind, &raw) else {
            continue;
        };
        out.push((row_lo + i, value));
    }
    Ok(out)
}

fn read_span(path: &Path, start: u64, end: u64) -> Result<Vec<u8>, DataError> {
    let expected = (end - start) as usize;
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DataError::FileGone { path: path.to_path_buf() }
        } else {
            DataError::Io(e)
        }
    })?;
    file.seek(SeekFrom::Start(start))?;

    let mut buf = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(DataError::TruncatedRead {
                offset: start,
                expected,
                got: filled,
            });
        }
        filled += n;
    }
    Ok(buf)
}

fn parse_chunk(
    index: &RowIndex,
    schema: &TableSchema,
    row_lo: usize,
    row_hi: usize,
    byte_start: u64,
    buf: &[u8],
) -> Result<ColumnarChunk, DataError> {
    let expected = schema.expected_fields();
    let axis_kind = schema.axis_kind();
    let window = &index.spans()[row_lo..row_hi];

    let mut axis = AxisBuilder::new(axis_kind, row_hi - row_lo);
    let mut columns: Vec<ColumnBuilder> = schema
        .retained()
        .iter()
        .map(|c| ColumnBuilder::new(&c.data_type, row_hi - row_lo))
        .collect();
    let mut rows = Vec::with_capacity(row_hi - row_lo);
    let mut malformed = 0usize;
    let mut prev_axis: Option<AxisValue> = None;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(buf);
    let mut record = csv::ByteRecord::new();

    loop {
        // Re-anchor each record to its absolute row through its byte offset,
        // so quoting oddities cannot shift the mapping.
        let rel = reader.position().byte();
        if !reader.read_byte_record(&mut record)? {
            break;
        }
        let slot = window.partition_point(|s| s.offset - byte_start < rel);
        let absolute = row_lo + slot.min(window.len().saturating_sub(1));

        if record.len() != expected {
            malformed += 1;
            continue;
        }
        let axis_raw = record
            .get(0)
            .and_then(|b| std::str::from_utf8(b).ok());
        let Some(axis_raw) = axis_raw else {
            malformed += 1;
            continue;
        };
        let Some(value) = AxisValue::parse(axis_kind, axis_raw) else {
            malformed += 1;
            continue;
        };
        if prev_axis.as_ref().map(|p| value.is_before(p)).unwrap_or(false) {
            malformed += 1;
            continue;
        }
        if !axis.append(&value) {
            malformed += 1;
            continue;
        }

        for (builder, col) in columns.iter_mut().zip(schema.retained()) {
            let raw = record
                .get(col.source_index)
                .and_then(|b| std::str::from_utf8(b).ok())
                .unwrap_or("");
            builder.append(raw);
        }
        rows.push(absolute);
        prev_axis = Some(value);
    }

    if malformed > 0 {
        debug!(row_lo, row_hi, malformed, "skipped malformed rows during read");
    }

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
    arrays.push(axis.finish());
    arrays.extend(columns.into_iter().map(ColumnBuilder::finish));
    let batch = RecordBatch::try_new(schema.arrow(), arrays)?;

    Ok(ColumnarChunk {
        batch,
        first_row: row_lo,
        rows,
        malformed_rows: malformed,
    })
}

enum AxisBuilder {
    Integer(Int64Builder),
    Float(Float64Builder),
    Instant(TimestampNanosecondBuilder),
    Text(StringBuilder),
}

impl AxisBuilder {
    fn new(kind: AxisKind, capacity: usize) -> Self {
        match kind {
            AxisKind::Integer => AxisBuilder::Integer(Int64Builder::with_capacity(capacity)),
            AxisKind::Float => AxisBuilder::Float(Float64Builder::with_capacity(capacity)),
            AxisKind::Instant => {
                AxisBuilder::Instant(TimestampNanosecondBuilder::with_capacity(capacity))
            }
            AxisKind::Text => {
                AxisBuilder::Text(StringBuilder::with_capacity(capacity, capacity * 8))
            }
        }
    }

    fn append(&mut self, value: &AxisValue) -> bool {
        match (self, value) {
            (AxisBuilder::Integer(b), AxisValue::Integer(v)) => {
                b.append_value(*v);
                true
            }
            (AxisBuilder::Float(b), AxisValue::Float(v)) => {
                b.append_value(*v);
                true
            }
            (AxisBuilder::Instant(b), AxisValue::Instant(t)) => match t.timestamp_nanos_opt() {
                Some(ns) => {
                    b.append_value(ns);
                    true
                }
                None => false,
            },
            (AxisBuilder::Text(b), AxisValue::Text(s)) => {
                b.append_value(s);
                true
            }
            _ => false,
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            AxisBuilder::Integer(mut b) => Arc::new(b.finish()),
            AxisBuilder::Float(mut b) => Arc::new(b.finish()),
            AxisBuilder::Instant(mut b) => Arc::new(b.finish().with_timezone("UTC")),
            AxisBuilder::Text(mut b) => Arc::new(b.finish()),
        }
    }
}

enum ColumnBuilder {
    I32(Int32Builder),
    I64(Int64Builder),
    F32(Float32Builder),
    F64(Float64Builder),
}

impl ColumnBuilder {
    fn new(data_type: &DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Int32 => ColumnBuilder::I32(Int32Builder::with_capacity(capacity)),
            DataType::Int64 => ColumnBuilder::I64(Int64Builder::with_capacity(capacity)),
            DataType::Float32 => ColumnBuilder::F32(Float32Builder::with_capacity(capacity)),
            _ => ColumnBuilder::F64(Float64Builder::with_capacity(capacity)),
        }
    }

    /// Parse one raw field. Missing or unparseable float fields become NaN
    /// values; integer fields become nulls. Both surface as NaN gaps.
    fn append(&mut self, raw: &str) {
        match self {
            ColumnBuilder::I32(b) => match raw.parse::<i32>() {
                Ok(v) => b.append_value(v),
                Err(_) => b.append_null(),
            },
            ColumnBuilder::I64(b) => match raw.parse::<i64>() {
                Ok(v) => b.append_value(v),
                Err(_) => b.append_null(),
            },
            ColumnBuilder::F32(b) => b.append_value(raw.parse::<f32>().unwrap_or(f32::NAN)),
            ColumnBuilder::F64(b) => b.append_value(raw.parse::<f64>().unwrap_or(f64::NAN)),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            ColumnBuilder::I32(mut b) => Arc::new(b.finish()),
            ColumnBuilder::I64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::F32(mut b) => Arc::new(b.finish()),
            ColumnBuilder::F64(mut b) => Arc::new(b.finish()),
        }
    }
}
