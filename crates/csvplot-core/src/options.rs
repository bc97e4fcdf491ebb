//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable engine parameters, fixed for the lifetime of one open handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Start in follow mode, polling the file for growth.
    pub follow: bool,
    /// Minimum number of prefix rows sampled for schema inference.
    pub sample_rows_min: usize,
    /// Fraction of total rows sampled for schema inference, when larger than
    /// `sample_rows_min`.
    pub sample_ratio: f64,
    /// Fail `open` when the file has a header but no data rows.
    pub require_data_rows: bool,
    /// Maximum points per displayed trace.
    pub max_display_points: usize,
    /// Min-max preselection multiplier for the downsampler.
    pub minmax_ratio: usize,
    /// Row stride between sparse x-index samples.
    pub sparse_stride: usize,
    /// Tail-follower poll interval.
    pub poll_interval: Duration,
    /// Minimum delay between fetches, measured from fetch completion.
    pub throttle_interval: Duration,
    /// Trailing-edge delay applied under rapid continuous input.
    pub debounce_delay: Duration,
    /// Largest row window materialized for a single viewport; larger requests
    /// are clipped to their most recent rows.
    pub max_fetch_rows: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            follow: false,
            sample_rows_min: 64,
            sample_ratio: 0.01,
            require_data_rows: false,
            max_display_points: 4_000,
            minmax_ratio: 4,
            sparse_stride: 1_000,
            poll_interval: Duration::from_secs(5),
            throttle_interval: Duration::from_millis(200),
            debounce_delay: Duration::from_millis(300),
            max_fetch_rows: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = EngineOptions::default();
        assert_eq!(opts.max_display_points, 4_000);
        assert_eq!(opts.minmax_ratio, 4);
        assert_eq!(opts.sample_rows_min, 64);
        assert_eq!(opts.poll_interval, Duration::from_secs(5));
    }
}
