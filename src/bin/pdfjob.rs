//! CLI binary for edgequake-pdfjob.
//!
//! A thin shim over the library crate: maps flags to `ClientConfig`, runs
//! each file as one job, and prints what happened.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfjob::{
    ClientConfig, HistoryEntry, Job, JobController, JobProgressCallback, NoopProgressCallback,
    Phase, ProgressCallback, QueueSnapshot,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while the job is in a phase with no
/// measurable progress, a percentage bar during upload and download.
/// One bar per job; `begin` creates it and `end` clears it.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, file: &str) {
        let bar = ProgressBar::new(100);
        bar.set_style(spinner_style());
        bar.set_prefix(file.to_string());
        bar.set_message("checking capacity…");
        bar.enable_steady_tick(Duration::from_millis(80));
        *self.slot() = Some(bar);
    }

    fn end(&self) {
        if let Some(bar) = self.slot().take() {
            bar.finish_and_clear();
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(bar) = self.slot().as_ref() {
            f(bar);
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS)
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::CheckingAdmission => "checking capacity…",
        Phase::QueueWaiting => "waiting for capacity…",
        Phase::Queued => "queued on server…",
        Phase::Uploading => "uploading",
        Phase::Splitting => "splitting…",
        Phase::Watermarking => "adding watermarks…",
        Phase::Merging => "merging…",
        Phase::Downloading => "downloading",
        Phase::Finished => "finished",
        Phase::Error => "failed",
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_phase_change(&self, phase: Phase) {
        self.with_bar(|bar| {
            if phase.is_measurable() {
                bar.set_style(bar_style());
            } else {
                bar.set_style(spinner_style());
            }
            bar.set_position(0);
            bar.set_message(phase_label(phase));
        });
    }

    fn on_progress(&self, _phase: Phase, percent: u8) {
        self.with_bar(|bar| bar.set_position(u64::from(percent)));
    }

    fn on_queue_update(&self, snapshot: Option<QueueSnapshot>) {
        if let Some(s) = snapshot {
            self.with_bar(|bar| {
                bar.set_message(format!(
                    "queue position {} ({} ahead, ~{}s)",
                    s.position, s.jobs_ahead, s.estimated_wait_secs
                ))
            });
        }
    }

    fn on_countdown(&self, remaining: Duration, attempt: u32) {
        self.with_bar(|bar| {
            bar.set_message(format!(
                "server busy, re-checking in {}s {}",
                remaining.as_secs(),
                dim(&format!("(attempt {attempt})"))
            ))
        });
    }

    fn on_warning(&self, message: &str) {
        self.with_bar(|bar| bar.println(format!("  {} {}", yellow("⚠"), yellow(message))));
    }

    fn on_saved(&self, file_name: &str, bytes: u64) {
        self.with_bar(|bar| {
            bar.println(format!(
                "  {} saved {}  {}",
                green("✓"),
                bold(file_name),
                dim(&format!("{bytes} bytes"))
            ))
        });
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Watermark one file in chunks of 10 pages
  pdfjob --chunk-size 10 report.pdf

  # Several files, one after another, into a directory
  pdfjob -c 25 -o out/ a.pdf b.pdf c.pdf

  # Another server, machine-readable summary
  pdfjob --server https://pdf.example.com -c 10 --json report.pdf > summary.json

BEHAVIOUR:
  Before uploading, pdfjob asks the server whether it has capacity. If not,
  it waits 5 s, then re-checks every 15 s until admitted. When 10 or more
  jobs are already queued it gives up with a "server too busy" message.

  If the automatic download fails, the processed file stays on the server
  for about 60 seconds; pdfjob offers one manual retry in that window.

  Ctrl-C aborts the running job and asks the server to clean it up.

ENVIRONMENT VARIABLES:
  PDFJOB_SERVER       Base URL of the processing service
  PDFJOB_OUTPUT_DIR   Where processed files are written
  PDFJOB_CHUNK_SIZE   Pages per chunk
  RUST_LOG            Override the log filter (e.g. edgequake_pdfjob=debug)
"#;

/// Split, watermark and merge PDFs on a remote processing service.
#[derive(Parser, Debug)]
#[command(
    name = "pdfjob",
    version,
    about = "Split, watermark and merge PDFs on a remote processing service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process, one job each, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Pages per chunk (positive integer).
    #[arg(short, long, env = "PDFJOB_CHUNK_SIZE")]
    chunk_size: String,

    /// Base URL of the processing service.
    #[arg(long, env = "PDFJOB_SERVER", default_value = "http://localhost:8000")]
    server: String,

    /// Directory processed files are written to.
    #[arg(short, long, env = "PDFJOB_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "PDFJOB_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Print a JSON summary of jobs and history instead of text.
    #[arg(long, env = "PDFJOB_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDFJOB_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFJOB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFJOB_QUIET")]
    quiet: bool,
}

#[derive(Serialize)]
struct Summary {
    jobs: Vec<Job>,
    history: Vec<HistoryEntry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Keep INFO logs out of the way while the bar is drawing.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build controller ─────────────────────────────────────────────────
    let config = ClientConfig::builder()
        .base_url(cli.server.clone())
        .request_timeout_secs(cli.timeout)
        .output_dir(cli.output_dir.clone())
        .build()
        .context("Invalid configuration")?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;
    let window = config.manual_download_window();

    let cli_cb = show_progress.then(CliProgressCallback::new);
    let callback: ProgressCallback = match &cli_cb {
        Some(cb) => Arc::clone(cb) as ProgressCallback,
        None => Arc::new(NoopProgressCallback),
    };
    let controller =
        JobController::http(config, callback).context("Failed to create HTTP client")?;

    // Ctrl-C aborts the running job; a second one with nothing running exits.
    let interrupt = controller.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !interrupt.abort() {
                std::process::exit(130);
            }
        }
    });

    // ── Run jobs ─────────────────────────────────────────────────────────
    let total = cli.files.len();
    let mut answers = None;
    let mut jobs = Vec::with_capacity(total);
    let mut failed = 0usize;

    for path in &cli.files {
        let label = path.display().to_string();
        if let Some(cb) = &cli_cb {
            cb.begin(&label);
        }
        let result = controller.submit(path, &cli.chunk_size).await;
        if let Some(cb) = &cli_cb {
            cb.end();
        }

        let mut job = match result {
            Ok(job) => job,
            Err(e) => {
                failed += 1;
                eprintln!("{} {}  {}", red("✘"), bold(&label), red(&e.to_string()));
                continue;
            }
        };

        if job.manual_download {
            if !cli.quiet && !cli.json {
                if let Some(warning) = &job.warning {
                    eprintln!("  {} {}", yellow("⚠"), warning);
                }
            }
            if confirm(&mut answers, "Retry the download now?", window).await {
                match controller.manual_download().await {
                    Ok(saved) => {
                        if !cli.quiet && !cli.json {
                            eprintln!("  {} saved to {}", green("✓"), saved.display());
                        }
                    }
                    Err(e) => eprintln!("  {} {}", red("✘"), e),
                }
            }
            if let Some(current) = controller.snapshot() {
                job = current;
            }
        }

        if job.phase == Phase::Error {
            failed += 1;
        }
        if !cli.quiet && !cli.json {
            report(&job);
        }
        jobs.push(job);
        controller
            .acknowledge()
            .context("Job did not reach a terminal state")?;
    }

    // ── Summary ──────────────────────────────────────────────────────────
    let history = controller.history().entries();
    if cli.json {
        let summary = Summary { jobs, history };
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet && !history.is_empty() {
        eprintln!("\n{}", bold("History"));
        for entry in &history {
            eprintln!(
                "  {:>4}  {}  {}{}",
                entry.id.to_string(),
                dim(&entry.timestamp.format("%H:%M:%S").to_string()),
                entry.derived_name,
                if entry.download_outstanding {
                    format!("  {}", yellow("(download pending)"))
                } else {
                    String::new()
                }
            );
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} job(s) failed");
    }
    Ok(())
}

/// One line per finished job.
fn report(job: &Job) {
    match job.phase {
        Phase::Finished if job.manual_download => eprintln!(
            "{} {}  {}",
            cyan("⚠"),
            bold(&job.original_name),
            yellow("processed, but not downloaded yet")
        ),
        Phase::Finished => eprintln!(
            "{} {}  →  {}",
            green("✔"),
            bold(&job.original_name),
            job.derived_name
        ),
        _ => eprintln!(
            "{} {}  {}",
            red("✘"),
            bold(&job.original_name),
            red(job.message.as_deref().unwrap_or("failed"))
        ),
    }
}

/// Ask a yes/no question on an interactive terminal, defaulting to yes.
/// Without a terminal the answer is yes; with no answer within `within`, no.
async fn confirm(
    answers: &mut Option<mpsc::UnboundedReceiver<String>>,
    question: &str,
    within: Duration,
) -> bool {
    if !io::stdin().is_terminal() {
        return true;
    }
    let rx = answers.get_or_insert_with(spawn_stdin_reader);
    drain_stale(rx);
    eprint!("  {question} [Y/n] ");
    io::stderr().flush().ok();
    answer(rx, within).await
}

/// Read stdin lines on a detached thread. A blocking read cannot be
/// cancelled, so prompts time out on the channel instead and an unanswered
/// prompt never holds up the runtime on exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Drop replies typed after an earlier prompt had already timed out.
fn drain_stale(rx: &mut mpsc::UnboundedReceiver<String>) {
    while rx.try_recv().is_ok() {}
}

async fn answer(rx: &mut mpsc::UnboundedReceiver<String>, within: Duration) -> bool {
    match tokio::time::timeout(within, rx.recv()).await {
        Ok(Some(line)) => !matches!(line.trim().to_lowercase().as_str(), "n" | "no"),
        _ => false,
    }
}
