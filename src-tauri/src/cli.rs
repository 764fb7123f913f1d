//! `pagelens process`: batch OCR from the command line.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pagelens_core::device::detect_device;
use pagelens_core::input::collect_inputs;
use pagelens_core::jobs::{BatchSummary, JobStatus};
use pagelens_core::{
    create_batch_jobs, AppState, DeviceChoice, NoOpSink, OcrMode, PageSelection, SystemInfo,
};

use crate::init_logging;

/// Arguments of the `process` subcommand
#[derive(clap::Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Image or PDF files; directories expand to the supported files inside
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Recognition mode: `text` or `text-img` (text plus cropped figures)
    #[arg(long)]
    pub mode: Option<OcrMode>,

    /// PDF pages to process, e.g. "1-5,7,10-12" (default: all)
    #[arg(long)]
    pub pages: Option<String>,

    /// Compute device: auto, cpu, cuda or metal
    #[arg(long)]
    pub device: Option<DeviceChoice>,

    /// Root directory for timestamped batch folders
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Debug logging and per-file output listing
    #[arg(long, short)]
    pub verbose: bool,
}

/// Run the command and return the process exit code
pub fn process(args: ProcessArgs) -> i32 {
    if args.verbose {
        init_logging(&["pagelens=debug", "pagelens_lib=debug", "pagelens_core=debug"]);
    } else {
        init_logging(&["pagelens=info", "pagelens_lib=info", "pagelens_core=info"]);
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return 1;
        }
    };

    let result = rt.block_on(async {
        let state = AppState::load()?;
        let mut stdout = std::io::stdout();
        run_process(&state, &args, &mut stdout).await
    });

    match result {
        Ok(summary) => exit_code(&summary),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

/// 0 only when at least one file was processed and none failed
pub fn exit_code(summary: &BatchSummary) -> i32 {
    if summary.total > 0 && summary.all_succeeded() {
        0
    } else {
        1
    }
}

/// Validate inputs, load the model, process the batch, print a summary.
pub async fn run_process<W: Write>(
    state: &AppState,
    args: &ProcessArgs,
    out: &mut W,
) -> Result<BatchSummary> {
    let info = SystemInfo::probe();
    writeln!(
        out,
        "PageLens {} | {} {} | {} CPUs | CUDA: {} | Metal: {}",
        info.version,
        info.os,
        info.arch,
        info.cpu_count,
        if info.cuda_supported { "yes" } else { "no" },
        if info.metal_supported { "yes" } else { "no" },
    )?;

    let collected = collect_inputs(&args.inputs);
    for (path, error) in &collected.rejected {
        writeln!(out, "  skipped {}: {}", path.display(), error)?;
    }
    if collected.files.is_empty() {
        bail!("No valid files found to process");
    }
    writeln!(out, "Found {} file(s) to process", collected.files.len())?;

    let mut options = state.default_options();
    if let Some(mode) = args.mode {
        options.mode = mode;
    }
    if let Some(device) = args.device {
        options.device = device;
    }
    if let Some(pages) = &args.pages {
        options.pages = PageSelection::parse(pages);
        writeln!(out, "PDF pages: {}", options.pages)?;
    }

    let device = detect_device(options.device);
    writeln!(out, "Mode: {} | Device: {}", options.mode, device)?;

    writeln!(out, "Loading model {}...", options.mode.variant().repo_id())?;
    state
        .engine
        .preload(options.mode.variant(), device)
        .await
        .context("Failed to load OCR model")?;

    let output_root = args
        .output
        .clone()
        .unwrap_or_else(|| state.config.output_dir.clone());
    let mut queue = create_batch_jobs(&collected.files, &options, &output_root)?;
    writeln!(
        out,
        "Queue {} | {} job(s) | output: {}",
        queue.id,
        queue.len(),
        queue.output_dir.display()
    )?;

    let verbose = args.verbose;
    let summary = queue
        .process(&state.engine, device, &NoOpSink, |job, done, total| {
            let line = match &job.status {
                JobStatus::Done { output_files, .. } => {
                    let mut line = format!("[{}/{}] ok   {}", done, total, job.file_name());
                    if verbose {
                        for file in output_files {
                            line.push_str(&format!("\n        -> {}", file.display()));
                        }
                    }
                    line
                }
                JobStatus::Failed { error, .. } => {
                    format!("[{}/{}] FAIL {}: {}", done, total, job.file_name(), error)
                }
                other => format!("[{}/{}] {}  {}", done, total, other.name(), job.file_name()),
            };
            let _ = writeln!(out, "{}", line);
        })
        .await;

    writeln!(out)?;
    writeln!(out, "Total:     {}", summary.total)?;
    writeln!(out, "Completed: {}/{}", summary.succeeded, summary.total)?;
    if summary.failed > 0 {
        writeln!(out, "Failed:    {}/{}", summary.failed, summary.total)?;
    }
    writeln!(out, "Duration:  {}", format_duration(summary.duration))?;
    writeln!(out, "Output:    {}", queue.output_dir.display())?;

    Ok(summary)
}

/// `1h 02m 03s`, `2m 03s` or `3.4s`
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
