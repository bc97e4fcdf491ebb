//! Axis column value model.
//!
//! The first CSV column drives the x-coordinate of every trace. Its kind is
//! probed once from a prefix sample, trying integer, float, UTC instant, and
//! opaque text in that order. Instants must match the strict ISO 8601 form
//! `YYYY-MM-DDTHH:MM:SS[.fff]Z` and compare as the underlying UTC instant;
//! local time is a display concern only.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Kind of the axis column, fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisKind {
    /// 64-bit signed integers.
    Integer,
    /// 64-bit floats (non-finite values are rejected).
    Float,
    /// UTC wall-clock instants with nanosecond precision.
    Instant,
    /// Opaque text, compared lexicographically; not eligible for range zoom.
    Text,
}

impl AxisKind {
    /// Pick the first kind that parses every sampled value.
    ///
    /// An empty sample set yields `Integer` (every probe passes vacuously).
    pub fn probe<'a, I>(samples: I) -> AxisKind
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut integer = true;
        let mut float = true;
        let mut instant = true;

        for value in samples {
            if integer && value.parse::<i64>().is_err() {
                integer = false;
            }
            if float && !value.parse::<f64>().map(f64::is_finite).unwrap_or(false) {
                float = false;
            }
            if instant && parse_instant(value).is_none() {
                instant = false;
            }
            if !integer && !float && !instant {
                return AxisKind::Text;
            }
        }

        if integer {
            AxisKind::Integer
        } else if float {
            AxisKind::Float
        } else if instant {
            AxisKind::Instant
        } else {
            AxisKind::Text
        }
    }

    /// Whether values of this kind form a usable range-zoom ordering.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, AxisKind::Text)
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AxisKind::Integer => "integer",
            AxisKind::Float => "float",
            AxisKind::Instant => "instant",
            AxisKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A single axis value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxisValue {
    Integer(i64),
    Float(f64),
    Instant(DateTime<Utc>),
    Text(String),
}

impl AxisValue {
    /// Parse a raw field under a fixed kind. `None` means the row is
    /// malformed with respect to the frozen schema.
    pub fn parse(kind: AxisKind, raw: &str) -> Option<AxisValue> {
        match kind {
            AxisKind::Integer => raw.parse::<i64>().ok().map(AxisValue::Integer),
            AxisKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(AxisValue::Float),
            AxisKind::Instant => parse_instant(raw).map(AxisValue::Instant),
            AxisKind::Text => Some(AxisValue::Text(raw.to_string())),
        }
    }

    pub fn kind(&self) -> AxisKind {
        match self {
            AxisValue::Integer(_) => AxisKind::Integer,
            AxisValue::Float(_) => AxisKind::Float,
            AxisValue::Instant(_) => AxisKind::Instant,
            AxisValue::Text(_) => AxisKind::Text,
        }
    }

    /// Compare two axis values. Integer and float cross-compare through f64
    /// promotion; other kind mixes have no ordering.
    pub fn compare(&self, other: &AxisValue) -> Option<Ordering> {
        use AxisValue::*;
        match (self, other) {
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Instant(a), Instant(b)) => Some(a.cmp(b)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// True when `self < other` under the axis ordering.
    pub fn is_before(&self, other: &AxisValue) -> bool {
        matches!(self.compare(other), Some(Ordering::Less))
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Integer(v) => write!(f, "{v}"),
            AxisValue::Float(v) => write!(f, "{v}"),
            // Instants render in local wall-clock time; comparisons above
            // always use the UTC instant.
            AxisValue::Instant(t) => {
                write!(f, "{}", t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.3f"))
            }
            AxisValue::Text(s) => f.write_str(s),
        }
    }
}

/// Parse a strict `YYYY-MM-DDTHH:MM:SS[.fff]Z` UTC instant.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let bytes = raw.as_bytes();
    // chrono's %Y accepts more than four digits, so pin the shape first.
    if bytes.len() < 20
        || bytes[4] != b'-'
        || bytes[7] != b'-'
        || bytes[10] != b'T'
        || bytes[13] != b':'
        || bytes[16] != b':'
        || !bytes[..4].iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    let body = raw.strip_suffix('Z')?;
    let naive = NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_prefers_integer() {
        let samples = ["0", "1", "42"];
        assert_eq!(AxisKind::probe(samples), AxisKind::Integer);
    }

    #[test]
    fn probe_falls_back_to_float() {
        let samples = ["0", "1.5", "2"];
        assert_eq!(AxisKind::probe(samples), AxisKind::Float);
    }

    #[test]
    fn probe_detects_instants() {
        let samples = ["2024-01-01T00:00:00Z", "2024-01-01T00:00:01.250Z"];
        assert_eq!(AxisKind::probe(samples), AxisKind::Instant);
    }

    #[test]
    fn probe_defaults_to_text() {
        let samples = ["alpha", "beta"];
        assert_eq!(AxisKind::probe(samples), AxisKind::Text);
    }

    #[test]
    fn probe_empty_sample_is_integer() {
        assert_eq!(AxisKind::probe(std::iter::empty::<&str>()), AxisKind::Integer);
    }

    #[test]
    fn instant_pattern_is_strict() {
        assert!(parse_instant("2024-01-02T03:04:05Z").is_some());
        assert!(parse_instant("2024-01-02T03:04:05.123456Z").is_some());
        // No trailing Z, space separator, offset form, short year: all rejected.
        assert!(parse_instant("2024-01-02T03:04:05").is_none());
        assert!(parse_instant("2024-01-02 03:04:05Z").is_none());
        assert!(parse_instant("2024-01-02T03:04:05+00:00").is_none());
        assert!(parse_instant("24-01-02T03:04:05Z").is_none());
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        assert!(AxisValue::parse(AxisKind::Float, "nan").is_none());
        assert!(AxisValue::parse(AxisKind::Float, "inf").is_none());
        assert!(AxisValue::parse(AxisKind::Float, "1.25").is_some());
    }

    #[test]
    fn integer_float_cross_comparison() {
        let a = AxisValue::Integer(2);
        let b = AxisValue::Float(2.5);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(b.compare(&a), Some(Ordering::Greater));
    }

    #[test]
    fn mixed_kinds_do_not_order() {
        let a = AxisValue::Integer(2);
        let b = AxisValue::Text("2".into());
        assert_eq!(a.compare(&b), None);
    }
}
