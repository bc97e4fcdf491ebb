//! Tail-follower thread: polls `(size, mtime)` of the open path and reacts
//! to growth, truncation, and in-place modification.
//!
//! Growth extends the index in place and, when the last rendered viewport
//! was at the tail, bumps the viewport version as if the user had scrolled
//! to the end. Truncation and rewrites bump the epoch through a full
//! rebuild. The debounce window here measures from handled growth, not from
//! event arrival, so a slow render cannot starve updates.

use crate::Shared;
use csvplot_core::follow::PollObservation;
use csvplot_data::DataError;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub(crate) fn run_watcher(shared: Arc<Shared>) {
    loop {
        {
            let mut guard = shared.sleep_lock.lock();
            if !shared.is_closed() {
                shared
                    .sleep_cond
                    .wait_for(&mut guard, shared.options.poll_interval);
            }
        }
        if shared.is_closed() {
            return;
        }
        if !shared.follow_enabled.load(Ordering::SeqCst) {
            continue;
        }
        poll_once(&shared);
    }
}

pub(crate) fn poll_once(shared: &Shared) {
    let Ok(meta) = fs::metadata(&shared.path) else {
        // The file may reappear; keep polling.
        debug!(path = %shared.path.display(), "monitored file missing");
        return;
    };
    let size = meta.len();
    let mtime = meta.modified().ok();

    let observation = shared.follower.lock().classify(size, mtime);
    match observation {
        PollObservation::Unchanged => {}
        PollObservation::Grew => {
            if shared.follower.lock().debounced(Instant::now()) {
                debug!("growth debounced");
                return;
            }
            let appended = shared.table.write().append_tail();
            match appended {
                Ok(0) => {
                    // Only a partial trailing line so far; pick it up once
                    // its terminator lands.
                    shared.follower.lock().record(size, mtime);
                }
                Ok(rows) => {
                    info!(rows, "indexed appended rows");
                    {
                        let mut follower = shared.follower.lock();
                        follower.record(size, mtime);
                        follower.tail_mode = !shared.follow_paused.load(Ordering::SeqCst);
                        follower.debounce_until =
                            Some(Instant::now() + shared.options.debounce_delay);
                    }
                    shared.maybe_extend_tail();
                }
                Err(DataError::ResumeMismatch) => {
                    warn!("appended region does not match the index; rebuilding");
                    let _ = shared.rebuild();
                }
                Err(e) => {
                    warn!(error = %e, "tail scan failed");
                }
            }
        }
        PollObservation::Shrunk => {
            warn!(
                from = shared.follower.lock().last_size,
                to = size,
                "file truncated; rebuilding"
            );
            let _ = shared.rebuild();
        }
        PollObservation::Touched => {
            // Same size, newer mtime: probe the indexed bytes before
            // deciding anything drastic.
            match shared.table.read().tail_intact() {
                Ok(true) => {
                    shared.follower.lock().record(size, mtime);
                }
                _ => {
                    warn!("file modified in place; rebuilding");
                    let _ = shared.rebuild();
                }
            }
        }
    }
}
