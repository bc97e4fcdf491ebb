//! Engine facade: binds the row index, sparse x-index, ranged reader,
//! downsampler, and trace assembler into one handle with a worker thread
//! and an optional tail-follower thread.
//!
//! There is no process-wide state; everything an open file needs hangs off
//! its `Engine` handle and dies with it. Results are delivered from the
//! worker thread through the callback registered at open.

mod watcher;
mod worker;

use csvplot_core::coordinator::{Coordinator, CoordinatorAction};
use csvplot_core::follow::{viewport_at_tail, FollowerState};
use csvplot_data::{CsvTable, DataError, TableConfig};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime};
use tracing::{info, warn};
use worker::{FetchProduct, FetchRequest, Mailbox, RequestOrigin};

/// Callback invoked from the worker thread for every result or discard.
pub type EventCallback = Arc<dyn Fn(EngineEvent) + Send + Sync + 'static>;

/// Schema summary surfaced to the presentation layer.
#[derive(Debug, Clone)]
pub struct SchemaInfo {
    pub axis_kind: AxisKind,
    pub axis_name: String,
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub malformed_rows: usize,
    pub axis_range: Option<(AxisValue, AxisValue)>,
}

/// One open CSV file with its worker and follower threads.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

pub(crate) struct Shared {
    pub(crate) path: PathBuf,
    pub(crate) options: EngineOptions,
    pub(crate) callback: EventCallback,
    pub(crate) table: RwLock<CsvTable>,
    pub(crate) coord: Mutex<Coordinator>,
    pub(crate) mailbox: Mailbox,
    pub(crate) follower: Mutex<FollowerState>,
    pub(crate) follow_enabled: AtomicBool,
    pub(crate) follow_paused: AtomicBool,
    /// Version of the latest user-initiated viewport change. Fetches for
    /// this version drive the follow auto-pause decision, even when the
    /// fetch itself was respawned after a stale completion.
    pub(crate) user_version: AtomicU64,
    pub(crate) closed: AtomicBool,
    pub(crate) last_render: Mutex<Option<RenderMark>>,
    pub(crate) sleep_lock: Mutex<()>,
    pub(crate) sleep_cond: Condvar,
}

/// Row coverage of the most recently delivered result, for the tail check.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderMark {
    pub(crate) row_hi: usize,
    pub(crate) total_rows: usize,
}

impl Engine {
    /// Index the file, infer its schema, and start the worker thread.
    /// The follower thread starts too when `options.follow` is set.
    pub fn open(
        path: impl AsRef<Path>,
        options: EngineOptions,
        callback: EventCallback,
    ) -> Result<Engine, EngineError> {
        let path = path.as_ref().to_path_buf();
        let table = CsvTable::open(&path, table_config(&options)).map_err(map_data_error)?;
        if options.require_data_rows {
            table.ensure_non_empty().map_err(map_data_error)?;
        }

        let (size, mtime) = stat(&path);
        let follow = options.follow;
        let shared = Arc::new(Shared {
            path,
            options,
            callback,
            table: RwLock::new(table),
            coord: Mutex::new(Coordinator::new()),
            mailbox: Mailbox::new(),
            follower: Mutex::new(FollowerState::new(size, mtime)),
            follow_enabled: AtomicBool::new(follow),
            follow_paused: AtomicBool::new(false),
            user_version: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            last_render: Mutex::new(None),
            sleep_lock: Mutex::new(()),
            sleep_cond: Condvar::new(),
        });

        let worker = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("csvplot-worker".into())
                .spawn(move || worker::run_worker(shared))?
        };

        let engine = Engine {
            shared,
            worker: Some(worker),
            watcher: Mutex::new(None),
        };
        if follow {
            engine.spawn_watcher()?;
        }
        Ok(engine)
    }

    /// Request a viewport. Non-blocking; the result (or a discard notice)
    /// arrives through the callback. Consecutive identical bounds return
    /// the same token.
    pub fn request_viewport(&self, span: AxisSpan) -> Result<u64, EngineError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let (viewport, actions) = self
            .shared
            .coord
            .lock()
            .user_change(span.normalized(), false);
        self.shared
            .user_version
            .store(viewport.version, Ordering::SeqCst);
        self.shared.post_spawns(actions, RequestOrigin::User);
        Ok(viewport.version)
    }

    /// Toggle follow mode. Enabling clears a pause and starts the follower
    /// thread when it is not yet running.
    pub fn set_follow(&self, enabled: bool) -> Result<(), EngineError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.shared.follow_enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.shared.follow_paused.store(false, Ordering::SeqCst);
            self.spawn_watcher()?;
            // Wake the poller so growth is picked up promptly.
            self.shared.sleep_cond.notify_all();
        }
        Ok(())
    }

    /// Whether follow mode is on but paused because the user panned away
    /// from the tail.
    pub fn follow_paused(&self) -> bool {
        self.shared.follow_paused.load(Ordering::SeqCst)
    }

    /// Bump the epoch, rebuild the index from scratch, and re-emit the
    /// current viewport. A paused follow state stays paused.
    pub fn reload(&self) -> Result<(), EngineError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.shared.rebuild()
    }

    pub fn schema(&self) -> SchemaInfo {
        let table = self.shared.table.read();
        SchemaInfo {
            axis_kind: table.schema().axis_kind(),
            axis_name: table.schema().axis_name().to_string(),
            columns: table.schema().column_names(),
            total_rows: table.total_rows(),
            malformed_rows: table.malformed_rows(),
            axis_range: table.axis_range(),
        }
    }

    pub fn quality(&self) -> Vec<QualityIssue> {
        self.shared.table.read().schema().quality().to_vec()
    }

    /// Stop both threads and drop the indices. Idempotent; also runs on
    /// drop.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.mailbox.close();
        self.shared.sleep_cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(watcher) = self.watcher.lock().take() {
            let _ = watcher.join();
        }
        info!(path = %self.shared.path.display(), "engine closed");
    }

    fn spawn_watcher(&self) -> Result<(), EngineError> {
        let mut slot = self.watcher.lock();
        if slot.is_none() {
            let shared = self.shared.clone();
            *slot = Some(
                std::thread::Builder::new()
                    .name("csvplot-watcher".into())
                    .spawn(move || watcher::run_watcher(shared))?,
            );
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    pub(crate) fn post_spawns(&self, actions: Vec<CoordinatorAction>, origin: RequestOrigin) {
        for action in actions {
            if let CoordinatorAction::Spawn(viewport) = action {
                self.mailbox.post(FetchRequest {
                    viewport,
                    origin,
                    submitted: Instant::now(),
                });
            }
        }
    }

    pub(crate) fn record_render(&self, product: &FetchProduct) {
        *self.last_render.lock() = Some(RenderMark {
            row_hi: product.row_hi,
            total_rows: product.total_rows,
        });
    }

    /// Extend the viewport to the new tail after growth, unless the user is
    /// examining history.
    pub(crate) fn maybe_extend_tail(&self) {
        if !self.follow_enabled.load(Ordering::SeqCst)
            || self.follow_paused.load(Ordering::SeqCst)
        {
            return;
        }
        let at_tail = match *self.last_render.lock() {
            // Nothing rendered yet: follow from the start.
            None => true,
            Some(mark) => viewport_at_tail(mark.row_hi, mark.total_rows),
        };
        if !at_tail {
            return;
        }
        let actions = {
            let mut coord = self.coord.lock();
            let span = match coord.user_span() {
                Some(mut span) => {
                    // Keep the left edge, release the right edge to the tail.
                    span.end = None;
                    span
                }
                None => AxisSpan::full(),
            };
            coord.user_change(span, true).1
        };
        self.post_spawns(actions, RequestOrigin::Tail);
    }

    /// Full rebuild after truncation, in-place modification, or `reload`.
    /// On failure the last-known-good index stays in place.
    pub(crate) fn rebuild(&self) -> Result<(), EngineError> {
        let new_table = match CsvTable::open(&self.path, table_config(&self.options)) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "rebuild failed; keeping previous index");
                // The epoch still advances: whatever was on screen no longer
                // matches the file.
                self.coord.lock().epoch_change();
                return Err(map_data_error(e));
            }
        };

        let span = {
            let mut coord = self.coord.lock();
            let span = coord.user_span();
            coord.epoch_change();
            span
        };
        *self.table.write() = new_table;
        {
            let (size, mtime) = stat(&self.path);
            self.follower.lock().record(size, mtime);
        }
        info!(path = %self.path.display(), "index rebuilt");

        let actions = {
            let mut coord = self.coord.lock();
            coord.user_change(span.unwrap_or_else(AxisSpan::full), true).1
        };
        self.post_spawns(actions, RequestOrigin::Refresh);
        Ok(())
    }

    /// A fetch hit a shape change (file gone or shorter than the index).
    /// Rebuild if the file really shrank; transient races resolve themselves.
    pub(crate) fn handle_shape_change(&self) {
        let known = self.table.read().index().file_size();
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() >= known => {}
            _ => {
                let _ = self.rebuild();
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn table_config(options: &EngineOptions) -> TableConfig {
    TableConfig {
        sample_rows_min: options.sample_rows_min,
        sample_ratio: options.sample_ratio,
        sparse_stride: options.sparse_stride,
    }
}

fn stat(path: &Path) -> (u64, Option<SystemTime>) {
    match fs::metadata(path) {
        Ok(meta) => (meta.len(), meta.modified().ok()),
        Err(_) => (0, None),
    }
}

pub(crate) fn map_data_error(error: DataError) -> EngineError {
    match error {
        DataError::EmptyFile { path } => EngineError::EmptyFile(path),
        DataError::NoHeader { path } => EngineError::NoHeader(path),
        DataError::NoDataRows { path } => EngineError::NoDataRows(path),
        DataError::NoNumericColumns => EngineError::NoNumericColumns,
        DataError::NonMonotonicAxis { row } => EngineError::NonMonotonicAxis { row },
        DataError::Io(e) => EngineError::Io(e),
        other => EngineError::Data(other.to_string()),
    }
}

// Re-exports for consumers of the facade.
pub use csvplot_core::{
    AxisKind, AxisSpan, AxisValue, DiscardReason, EngineEvent, EngineError, EngineOptions,
    TraceBundle, TraceSeries,
};
pub use csvplot_data::QualityIssue;
