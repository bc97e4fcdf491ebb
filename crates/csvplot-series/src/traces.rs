//! Trace assembly: one downsampled display series per retained column.
//!
//! The shared axis array is converted to numeric x-values for selection
//! (instants subtract their first value in signed 64-bit nanoseconds before
//! any float conversion), while the display xs keep the original axis
//! values. NaN ys flow through untouched so the renderer sees gaps.

use crate::downsample::downsample_indices;
use arrow::array::{
    Array, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampNanosecondArray,
};
use arrow::datatypes::DataType;
use chrono::{DateTime, Utc};
use csvplot_core::axis::{AxisKind, AxisValue};
use csvplot_core::payload::TraceSeries;
use csvplot_data::{ColumnarChunk, TableSchema};
use tracing::debug;

/// Produce one display series per retained numeric column.
pub fn assemble_traces(
    chunk: &ColumnarChunk,
    schema: &TableSchema,
    max_points: usize,
    minmax_ratio: usize,
) -> Vec<TraceSeries> {
    let (display, numeric) = axis_values(chunk, schema.axis_kind());
    let mut traces = Vec::with_capacity(schema.retained().len());

    for (slot, column) in schema.retained().iter().enumerate() {
        let ys = column_f64(chunk, slot + 1);
        let indices = downsample_indices(&numeric, &ys, max_points, minmax_ratio);
        let xs: Vec<AxisValue> = indices.iter().map(|&i| display[i].clone()).collect();
        let ys_out: Vec<f64> = indices.iter().map(|&i| ys[i]).collect();
        let gaps_present = ys_out.iter().any(|v| v.is_nan());
        traces.push(TraceSeries {
            name: column.name.clone(),
            xs,
            ys: ys_out,
            gaps_present,
        });
    }

    debug!(
        traces = traces.len(),
        rows = chunk.num_rows(),
        "assembled display series"
    );
    traces
}

/// Split the axis column into display values and the numeric values used
/// for downsampling. Text axes fall back to their row position.
fn axis_values(chunk: &ColumnarChunk, kind: AxisKind) -> (Vec<AxisValue>, Vec<f64>) {
    let array = chunk.batch.column(0);
    match kind {
        AxisKind::Integer => {
            let a = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("integer axis column");
            let display = a.values().iter().map(|&v| AxisValue::Integer(v)).collect();
            let numeric = a.values().iter().map(|&v| v as f64).collect();
            (display, numeric)
        }
        AxisKind::Float => {
            let a = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("float axis column");
            let display = a.values().iter().map(|&v| AxisValue::Float(v)).collect();
            let numeric = a.values().to_vec();
            (display, numeric)
        }
        AxisKind::Instant => {
            let a = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()
                .expect("instant axis column");
            let origin = if a.is_empty() { 0 } else { a.value(0) };
            let display = a
                .values()
                .iter()
                .map(|&ns| AxisValue::Instant(DateTime::<Utc>::from_timestamp_nanos(ns)))
                .collect();
            // Relative nanoseconds stay exact within any practical viewport.
            let numeric = a.values().iter().map(|&ns| (ns - origin) as f64).collect();
            (display, numeric)
        }
        AxisKind::Text => {
            let a = array
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("text axis column");
            let display = (0..a.len())
                .map(|i| AxisValue::Text(a.value(i).to_string()))
                .collect();
            let numeric = (0..a.len()).map(|i| i as f64).collect();
            (display, numeric)
        }
    }
}

/// Extract one y column as f64, with nulls surfacing as NaN.
fn column_f64(chunk: &ColumnarChunk, column: usize) -> Vec<f64> {
    let array = chunk.batch.column(column);
    match array.data_type() {
        DataType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().unwrap();
            (0..a.len())
                .map(|i| if a.is_null(i) { f64::NAN } else { a.value(i) })
                .collect()
        }
        DataType::Float32 => {
            let a = array.as_any().downcast_ref::<Float32Array>().unwrap();
            (0..a.len())
                .map(|i| if a.is_null(i) { f64::NAN } else { a.value(i) as f64 })
                .collect()
        }
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            (0..a.len())
                .map(|i| if a.is_null(i) { f64::NAN } else { a.value(i) as f64 })
                .collect()
        }
        DataType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().unwrap();
            (0..a.len())
                .map(|i| if a.is_null(i) { f64::NAN } else { a.value(i) as f64 })
                .collect()
        }
        other => {
            debug!(?other, "unexpected column type; emitting gaps");
            vec![f64::NAN; array.len()]
        }
    }
}
