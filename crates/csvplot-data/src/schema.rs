//! Schema inference and numeric column filtering.
//!
//! Runs once per open over a bounded prefix sample, then is frozen: rows
//! seen later that do not parse under the inferred schema are malformed,
//! never a schema redefinition.

use crate::index::RowIndex;
use crate::DataError;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use csvplot_core::axis::AxisKind;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{info, warn};

/// Why a column was dropped or flagged during filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityIssue {
    /// Every sampled value was missing; the column was dropped.
    AllMissing { column: String },
    /// The column was retained but most sampled values were missing.
    HighMissingRatio { column: String, ratio: f64 },
    /// The column is not numeric and was dropped.
    NonNumeric { column: String },
}

/// A numeric column that survived filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedColumn {
    pub name: String,
    /// Position of this column in the source CSV row.
    pub source_index: usize,
    pub data_type: DataType,
}

/// Immutable per-open table schema: the axis column plus every retained
/// numeric column, as an arrow schema.
#[derive(Debug, Clone)]
pub struct TableSchema {
    schema: Arc<Schema>,
    axis_kind: AxisKind,
    retained: Vec<RetainedColumn>,
    quality: Vec<QualityIssue>,
    expected_fields: usize,
}

impl TableSchema {
    pub fn arrow(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    pub fn axis_kind(&self) -> AxisKind {
        self.axis_kind
    }

    pub fn axis_name(&self) -> &str {
        self.schema.field(0).name()
    }

    pub fn retained(&self) -> &[RetainedColumn] {
        &self.retained
    }

    pub fn quality(&self) -> &[QualityIssue] {
        &self.quality
    }

    /// Field count of the source rows (not the retained subset).
    pub fn expected_fields(&self) -> usize {
        self.expected_fields
    }

    pub fn column_names(&self) -> Vec<String> {
        self.retained.iter().map(|c| c.name.clone()).collect()
    }
}

pub(crate) fn axis_data_type(kind: AxisKind) -> DataType {
    match kind {
        AxisKind::Integer => DataType::Int64,
        AxisKind::Float => DataType::Float64,
        AxisKind::Instant => DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
        AxisKind::Text => DataType::Utf8,
    }
}

/// Per-column sampling accumulator.
#[derive(Debug, Clone)]
struct ColumnStats {
    missing: usize,
    present: usize,
    is_int: bool,
    fits_i32: bool,
    is_float: bool,
    fits_f32: bool,
}

impl ColumnStats {
    fn new() -> Self {
        Self {
            missing: 0,
            present: 0,
            is_int: true,
            fits_i32: true,
            is_float: true,
            fits_f32: true,
        }
    }

    fn observe(&mut self, value: &str) {
        // Empty fields and literal NaN spellings count as missing.
        if value.is_empty() {
            self.missing += 1;
            return;
        }
        if let Ok(v) = value.parse::<f64>() {
            if v.is_nan() {
                self.missing += 1;
                return;
            }
            if (v as f32) as f64 != v {
                self.fits_f32 = false;
            }
        } else {
            self.is_float = false;
        }
        if let Ok(v) = value.parse::<i64>() {
            if i32::try_from(v).is_err() {
                self.fits_i32 = false;
            }
        } else {
            self.is_int = false;
        }
        self.present += 1;
    }

    /// Numeric kind for the sampled values, narrowed to 32 bits when every
    /// value fits losslessly. `None` means non-numeric.
    fn numeric_type(&self) -> Option<DataType> {
        if self.is_int {
            Some(if self.fits_i32 { DataType::Int32 } else { DataType::Int64 })
        } else if self.is_float {
            Some(if self.fits_f32 { DataType::Float32 } else { DataType::Float64 })
        } else {
            None
        }
    }
}

/// Infer the schema from the first `sample_rows` indexed rows and apply the
/// numeric column filter. The axis kind is fixed by the scan and exempt
/// from filtering.
pub(crate) fn infer_schema(
    index: &RowIndex,
    axis_kind: AxisKind,
    sample_rows: usize,
) -> Result<TableSchema, DataError> {
    let names = sanitize_names(index.header_fields());
    let expected = index.expected_fields();

    let mut stats: Vec<ColumnStats> = (0..expected).map(|_| ColumnStats::new()).collect();
    let mut sampled = 0usize;

    let sample_rows = sample_rows.min(index.row_count());
    if sample_rows > 0 {
        let (start, end) = index.byte_range(0, sample_rows)?;
        let mut buf = vec![0u8; (end - start) as usize];
        let mut file = File::open(index.path())?;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(buf.as_slice());
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record)? {
            if record.len() != expected {
                continue;
            }
            sampled += 1;
            for (col, stat) in stats.iter_mut().enumerate().skip(1) {
                stat.observe(record.get(col).unwrap_or(""));
            }
        }
    }

    let mut retained = Vec::new();
    let mut quality = Vec::new();

    for (col, name) in names.iter().enumerate().skip(1) {
        let stat = &stats[col];
        if sampled == 0 {
            // Nothing to sample against (empty body): keep every non-axis
            // column as a float so an appended tail has somewhere to land.
            retained.push(RetainedColumn {
                name: name.clone(),
                source_index: col,
                data_type: DataType::Float64,
            });
            continue;
        }
        if stat.present == 0 {
            warn!(column = %name, "dropping all-missing column");
            quality.push(QualityIssue::AllMissing { column: name.clone() });
            continue;
        }
        let Some(data_type) = stat.numeric_type() else {
            info!(column = %name, "dropping non-numeric column");
            quality.push(QualityIssue::NonNumeric { column: name.clone() });
            continue;
        };
        let ratio = stat.missing as f64 / sampled as f64;
        if ratio > 0.5 {
            info!(column = %name, ratio, "column is mostly missing");
            quality.push(QualityIssue::HighMissingRatio {
                column: name.clone(),
                ratio,
            });
        }
        retained.push(RetainedColumn {
            name: name.clone(),
            source_index: col,
            data_type,
        });
    }

    if retained.is_empty() {
        return Err(DataError::NoNumericColumns);
    }

    let mut fields = Vec::with_capacity(retained.len() + 1);
    fields.push(Field::new(&names[0], axis_data_type(axis_kind), true));
    for col in &retained {
        fields.push(Field::new(&col.name, col.data_type.clone(), true));
    }

    Ok(TableSchema {
        schema: Arc::new(Schema::new(fields)),
        axis_kind,
        retained,
        quality,
        expected_fields: expected,
    })
}

/// Trim, strip a leading BOM, name anonymous columns, and make duplicates
/// unique with a numeric suffix.
fn sanitize_names(raw: &[String]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, name) in raw.iter().enumerate() {
        let mut name = name.trim().trim_start_matches('\u{feff}').to_string();
        if name.is_empty() {
            name = format!("column_{i}");
        }
        let seen = counts.entry(name.clone()).or_insert(0);
        *seen += 1;
        if *seen > 1 {
            name = format!("{name}_{seen}");
        }
        out.push(name);
    }
    out
}
