//! csvplot command-line front-end.
//!
//! Opens a CSV file through the engine, prints the inferred schema and the
//! downsampled full-range traces, and (with `--follow`) keeps streaming
//! viewport updates as the file grows. The interactive chart shell consumes
//! the same facade; this binary is the headless spine around it.
//!
//! Exit codes: 0 on success, 1 for data errors (missing file, no numeric
//! columns, non-monotonic axis), 2 for anything unexpected.

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::unbounded;
use csvplot_engine::{
    AxisSpan, DiscardReason, Engine, EngineError, EngineEvent, EngineOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "csvplot", about = "Interactive CSV time-series chart viewer")]
struct Args {
    /// Path to the CSV file to visualize.
    csv_file: PathBuf,

    /// Follow the file and refresh as rows are appended.
    #[arg(long)]
    follow: bool,

    /// Maximum points kept per displayed trace.
    #[arg(long, default_value_t = 4_000)]
    max_points: usize,

    /// Seconds between file growth polls in follow mode.
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(engine_err) = e.downcast_ref::<EngineError>() {
                error!("data error: {engine_err}");
                match engine_err {
                    EngineError::EmptyFile(_)
                    | EngineError::NoHeader(_)
                    | EngineError::NoDataRows(_)
                    | EngineError::NoNumericColumns
                    | EngineError::NonMonotonicAxis { .. }
                    | EngineError::Io(_) => ExitCode::from(1),
                    _ => ExitCode::from(2),
                }
            } else {
                error!("unexpected error: {e:#}");
                ExitCode::from(2)
            }
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let options = EngineOptions {
        follow: args.follow,
        max_display_points: args.max_points,
        poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
        ..EngineOptions::default()
    };

    let (tx, rx) = unbounded();
    let callback: csvplot_engine::EventCallback = Arc::new(move |event: EngineEvent| {
        let _ = tx.send(event);
    });

    let engine = Engine::open(&args.csv_file, options, callback)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("failed to open {}", args.csv_file.display()))?;

    let schema = engine.schema();
    info!(
        rows = schema.total_rows,
        malformed = schema.malformed_rows,
        axis = %schema.axis_kind,
        "opened {}",
        args.csv_file.display()
    );
    println!(
        "{}: {} rows, axis '{}' ({})",
        args.csv_file.display(),
        schema.total_rows,
        schema.axis_name,
        schema.axis_kind
    );
    for issue in engine.quality() {
        println!("  quality: {issue:?}");
    }

    engine
        .request_viewport(AxisSpan::full())
        .map_err(anyhow::Error::from)?;

    loop {
        let event = rx
            .recv()
            .context("engine stopped before delivering a result")?;
        match event {
            EngineEvent::Result(bundle) => {
                let window = match (&bundle.viewport.x_start, &bundle.viewport.x_end) {
                    (Some(start), Some(end)) => format!("{start} .. {end}"),
                    _ => "empty".to_string(),
                };
                println!(
                    "viewport {window}{} | {} rows total",
                    if bundle.viewport.clipped { " (clipped)" } else { "" },
                    bundle.total_rows
                );
                for trace in &bundle.traces {
                    println!(
                        "  {}: {} points{}",
                        trace.name,
                        trace.xs.len(),
                        if trace.gaps_present { ", gaps" } else { "" }
                    );
                }
                if !args.follow {
                    return Ok(());
                }
            }
            EngineEvent::Discarded { token, reason, .. } => match reason {
                DiscardReason::Superseded | DiscardReason::EpochChanged => {
                    info!(token, ?reason, "viewport discarded");
                }
                DiscardReason::Io(detail) => {
                    error!(token, "viewport fetch failed: {detail}");
                    if !args.follow {
                        anyhow::bail!("viewport fetch failed: {detail}");
                    }
                }
            },
        }
    }
}
