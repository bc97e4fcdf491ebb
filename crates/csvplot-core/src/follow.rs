//! Follow-mode bookkeeping: tail classification and file poll decisions.

use std::time::{Instant, SystemTime};

/// Number of rows from the end that still count as "at tail".
///
/// 5% of the file, capped at 100k rows so enormous files do not rubber-band
/// the viewport on every append.
pub fn tail_threshold_rows(total_rows: usize) -> usize {
    (total_rows / 20).min(100_000)
}

/// Whether a viewport whose last materialized row is `end_row` (exclusive)
/// sits at the tail of `total_rows`.
pub fn viewport_at_tail(end_row: usize, total_rows: usize) -> bool {
    if total_rows == 0 {
        return true;
    }
    total_rows.saturating_sub(end_row) <= tail_threshold_rows(total_rows)
}

/// What one `(size, mtime)` observation means relative to the last poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollObservation {
    /// Nothing changed.
    Unchanged,
    /// The file grew; the index can be extended in place.
    Grew,
    /// The file shrank; truncation, full rebuild required.
    Shrunk,
    /// Same size but a newer mtime; the tail bytes must be probed.
    Touched,
}

/// Watcher-owned follower state. Mutated only by the watcher thread and
/// read elsewhere as a snapshot.
#[derive(Debug, Clone)]
pub struct FollowerState {
    pub last_size: u64,
    pub last_mtime: Option<SystemTime>,
    /// Whether viewport extension is currently active (false = paused).
    pub tail_mode: bool,
    /// Growth observed before this deadline is ignored.
    pub debounce_until: Option<Instant>,
}

impl FollowerState {
    pub fn new(size: u64, mtime: Option<SystemTime>) -> Self {
        Self {
            last_size: size,
            last_mtime: mtime,
            tail_mode: true,
            debounce_until: None,
        }
    }

    /// Classify a fresh stat observation against the recorded state.
    pub fn classify(&self, size: u64, mtime: Option<SystemTime>) -> PollObservation {
        if size > self.last_size {
            PollObservation::Grew
        } else if size < self.last_size {
            PollObservation::Shrunk
        } else if matches!((mtime, self.last_mtime), (Some(m), Some(prev)) if m > prev) {
            PollObservation::Touched
        } else {
            PollObservation::Unchanged
        }
    }

    /// Record the observation just handled.
    pub fn record(&mut self, size: u64, mtime: Option<SystemTime>) {
        self.last_size = size;
        self.last_mtime = mtime;
    }

    /// Whether growth handling is currently debounced.
    pub fn debounced(&self, now: Instant) -> bool {
        self.debounce_until.map(|until| now < until).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn threshold_is_five_percent_with_cap() {
        assert_eq!(tail_threshold_rows(1_000), 50);
        assert_eq!(tail_threshold_rows(100), 5);
        assert_eq!(tail_threshold_rows(10_000_000), 100_000);
    }

    #[test]
    fn tail_classification() {
        // 1000 rows, threshold 50: viewports ending in the last 50 rows
        // follow the tail.
        assert!(viewport_at_tail(1_000, 1_000));
        assert!(viewport_at_tail(950, 1_000));
        assert!(!viewport_at_tail(949, 1_000));
        assert!(viewport_at_tail(0, 0));
    }

    #[test]
    fn classify_growth_and_truncation() {
        let state = FollowerState::new(100, None);
        assert_eq!(state.classify(150, None), PollObservation::Grew);
        assert_eq!(state.classify(50, None), PollObservation::Shrunk);
        assert_eq!(state.classify(100, None), PollObservation::Unchanged);
    }

    #[test]
    fn classify_mtime_touch() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(200);
        let state = FollowerState::new(100, Some(t0));
        assert_eq!(state.classify(100, Some(t1)), PollObservation::Touched);
        assert_eq!(state.classify(100, Some(t0)), PollObservation::Unchanged);
    }

    #[test]
    fn debounce_window() {
        let mut state = FollowerState::new(0, None);
        let now = Instant::now();
        assert!(!state.debounced(now));
        state.debounce_until = Some(now + Duration::from_millis(100));
        assert!(state.debounced(now));
        assert!(!state.debounced(now + Duration::from_millis(150)));
    }
}
