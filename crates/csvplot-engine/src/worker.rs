//! Worker thread: a single-slot replace-on-write mailbox feeding one serial
//! fetch pipeline (resolve range, clip, read, assemble, deliver).
//!
//! Keeping disk access on one thread bounds memory to a single chunk and
//! makes delivery order trivial. A running fetch is never cancelled;
//! staleness is detected at completion through the coordinator.

use crate::Shared;
use csvplot_core::coordinator::CoordinatorAction;
use csvplot_core::follow::viewport_at_tail;
use csvplot_core::payload::{DiscardReason, EngineEvent, TraceBundle, ViewportWindow};
use csvplot_core::viewport::Viewport;
use csvplot_data::DataError;
use csvplot_series::assemble_traces;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where a fetch request came from; user changes drive follow auto-pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestOrigin {
    User,
    Tail,
    Refresh,
}

pub(crate) struct FetchRequest {
    pub(crate) viewport: Viewport,
    pub(crate) origin: RequestOrigin,
    pub(crate) submitted: Instant,
}

/// Result of one fetch, before coordinator arbitration.
pub(crate) struct FetchProduct {
    pub(crate) bundle: TraceBundle,
    pub(crate) row_hi: usize,
    pub(crate) total_rows: usize,
}

/// Single-slot request mailbox. A new request overwrites a pending one,
/// which is what makes superseded versions skip their fetch entirely.
pub(crate) struct Mailbox {
    slot: Mutex<Slot>,
    cond: Condvar,
}

struct Slot {
    request: Option<FetchRequest>,
    writes_since_take: u32,
    last_write: Option<Instant>,
    closed: bool,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                request: None,
                writes_since_take: 0,
                last_write: None,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Replace whatever is pending.
    pub(crate) fn post(&self, request: FetchRequest) {
        let mut slot = self.slot.lock();
        if slot.closed {
            return;
        }
        slot.request = Some(request);
        slot.writes_since_take += 1;
        slot.last_write = Some(Instant::now());
        self.cond.notify_one();
    }

    /// Post only when nothing newer is already pending.
    pub(crate) fn post_if_empty(&self, request: FetchRequest) {
        let mut slot = self.slot.lock();
        if slot.closed || slot.request.is_some() {
            return;
        }
        slot.request = Some(request);
        slot.writes_since_take += 1;
        slot.last_write = Some(Instant::now());
        self.cond.notify_one();
    }

    pub(crate) fn close(&self) {
        self.slot.lock().closed = true;
        self.cond.notify_all();
    }

    /// Block until a request is ready. `not_before` is the throttle gate
    /// (measured from the last fetch completion); rapid overwrites switch to
    /// a trailing-edge debounce from the last write.
    pub(crate) fn take(
        &self,
        not_before: Option<Instant>,
        debounce: Duration,
    ) -> Option<FetchRequest> {
        let mut slot = self.slot.lock();
        loop {
            if slot.closed {
                return None;
            }
            if slot.request.is_some() {
                let mut ready = slot.last_write.unwrap_or_else(Instant::now);
                if slot.writes_since_take > 1 {
                    ready += debounce;
                }
                if let Some(gate) = not_before {
                    ready = ready.max(gate);
                }
                if Instant::now() >= ready {
                    slot.writes_since_take = 0;
                    return slot.request.take();
                }
                self.cond.wait_until(&mut slot, ready);
            } else {
                self.cond.wait(&mut slot);
            }
        }
    }
}

pub(crate) fn run_worker(shared: Arc<Shared>) {
    let throttle = shared.options.throttle_interval;
    let debounce = shared.options.debounce_delay;
    let mut last_complete: Option<Instant> = None;

    while let Some(request) = shared
        .mailbox
        .take(last_complete.map(|t| t + throttle), debounce)
    {
        debug!(
            version = request.viewport.version,
            origin = ?request.origin,
            waited_ms = request.submitted.elapsed().as_millis() as u64,
            "fetch started"
        );
        let outcome = fetch(&shared, &request);
        last_complete = Some(Instant::now());

        let failure = outcome
            .as_ref()
            .err()
            .map(|e| DiscardReason::Io(e.to_string()));
        let actions = shared
            .coord
            .lock()
            .fetch_done(&request.viewport, failure);

        for action in actions {
            match action {
                CoordinatorAction::Deliver(_) => {
                    if let Ok(product) = &outcome {
                        shared.record_render(product);
                        (shared.callback)(EngineEvent::Result(product.bundle.clone()));
                    }
                }
                CoordinatorAction::Discard {
                    version,
                    epoch,
                    reason,
                } => {
                    (shared.callback)(EngineEvent::Discarded {
                        token: version,
                        epoch,
                        reason,
                    });
                }
                CoordinatorAction::Spawn(viewport) => {
                    shared.mailbox.post_if_empty(FetchRequest {
                        viewport,
                        origin: RequestOrigin::Refresh,
                        submitted: Instant::now(),
                    });
                }
            }
        }

        // A fetch that found the file gone or shorter than the index means
        // the file changed shape underneath us.
        if let Err(e) = &outcome {
            if matches!(
                e,
                DataError::FileGone { .. } | DataError::TruncatedRead { .. }
            ) {
                shared.handle_shape_change();
            }
        }
    }
}

fn fetch(shared: &Shared, request: &FetchRequest) -> Result<FetchProduct, DataError> {
    let table = shared.table.read();
    let span = request.viewport.span.clone().normalized();
    let (mut row_lo, row_hi) = table.resolve_range(&span)?;
    let total_rows = table.total_rows();

    // A manual pan away from the tail pauses follow; polling and indexing
    // continue, the viewport stops moving. The check keys off the latest
    // user-initiated version rather than the request origin, so it still
    // fires when a superseded user change is refetched.
    if request.viewport.version == shared.user_version.load(Ordering::SeqCst)
        && shared.follow_enabled.load(Ordering::SeqCst)
        && !shared.follow_paused.load(Ordering::SeqCst)
        && !viewport_at_tail(row_hi, total_rows)
    {
        shared.follow_paused.store(true, Ordering::SeqCst);
        info!("follow paused: viewport left the tail");
    }

    let mut clipped = false;
    if row_hi - row_lo > shared.options.max_fetch_rows {
        row_lo = row_hi - shared.options.max_fetch_rows;
        clipped = true;
        debug!(row_lo, row_hi, "viewport clipped to a rolling window");
    }

    let chunk = table.read_range(row_lo, row_hi)?;
    let traces = assemble_traces(
        &chunk,
        table.schema(),
        shared.options.max_display_points,
        shared.options.minmax_ratio,
    );

    let (x_start, x_end) = match traces.first() {
        Some(trace) => (trace.xs.first().cloned(), trace.xs.last().cloned()),
        None => (None, None),
    };

    let bundle = TraceBundle {
        token: request.viewport.version,
        epoch: request.viewport.epoch,
        viewport: ViewportWindow {
            x_start,
            x_end,
            clipped,
        },
        traces,
        total_rows,
        malformed_rows: table.malformed_rows(),
    };

    Ok(FetchProduct {
        bundle,
        row_hi,
        total_rows,
    })
}
