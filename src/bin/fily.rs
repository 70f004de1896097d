//! CLI binary for fily-convert.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` / `ConvertOptions`, runs one batch and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fily_convert::{
    format_file_size, BatchOutcome, BatchProgressCallback, BatchSummary, ConversionType,
    ConvertOptions, ItemSnapshot, ItemStatus, Orchestrator, ProgressCallback, Quality, Rejection,
    ServiceConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

/// Terminal progress callback: one bar for the batch, one log line per file.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-file wall-clock start times, keyed by position in the run.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Converting");

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, position: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&position)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total} file(s)…"))
        ));
    }

    fn on_item_start(&self, position: usize, total: usize, name: &str) {
        self.start_times
            .lock()
            .unwrap()
            .insert(position, Instant::now());
        self.bar.set_length(total as u64);
        self.bar.set_message(name.to_string());
    }

    fn on_item_stage(&self, _position: usize, _total: usize, name: &str, status: ItemStatus) {
        self.bar.set_message(format!("{name} ({status})"));
    }

    fn on_item_progress(&self, name: &str, percent: u8) {
        self.bar.set_message(format!("{name} {percent}%"));
    }

    fn on_item_complete(&self, position: usize, total: usize, name: &str, download_ref: &str) {
        let secs = self.elapsed_secs(position);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            green("✓"),
            position,
            total,
            name,
            dim(download_ref),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, position: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(position);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            position,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, processed: usize, succeeded: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} file(s) converted successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                processed,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a few documents to PDF
  fily report.docx slides.pptx scan.png

  # Talk to a service somewhere else
  fily --server http://convert.internal:5000 notes.txt

  # Password-protect an existing PDF
  fily --conversion-type pdf-password --password s3cret contract.pdf

  # Keep a CSV record of what was converted
  fily --export-history converted.csv *.docx

  # JSON output for scripts
  fily --json report.docx > result.json

  # Show or delete conversions stored on the service
  fily --recent 10
  fily --delete 3f2c…

CONVERSION TYPES:
  any-to-pdf    Convert Any File to PDF (default)
  pdf-to-word   Convert PDF to Word
  pdf-password  Add Password to PDF
  pdf-merge     Merge Multiple PDFs

LIMITS:
  Files larger than 50 MB are rejected before upload. Accepted types are
  office documents, OpenDocument, text, markup, code and common images;
  files with an unknown type are accepted when their extension is known.

ENVIRONMENT VARIABLES:
  FILY_SERVER             Base URL of the conversion service
  FILY_CONVERSION_TYPE    Default conversion type
  FILY_QUALITY            low | high
  FILY_PASSWORD           Password for pdf-password conversions
  RUST_LOG                Override log filtering
"#;

/// Convert files to PDF through a remote conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "fily",
    version,
    about = "Convert files to PDF through a remote conversion service",
    long_about = "Upload documents and images to a conversion service, convert them one by one \
and report where each result can be downloaded. Failed files do not stop the batch.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to convert.
    files: Vec<PathBuf>,

    /// Base URL of the conversion service.
    #[arg(long, env = "FILY_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Transform to apply to every file.
    #[arg(long, env = "FILY_CONVERSION_TYPE", value_enum, default_value = "any-to-pdf")]
    conversion_type: ConversionTypeArg,

    /// Output quality: low or high.
    #[arg(long, env = "FILY_QUALITY", value_enum, default_value = "high")]
    quality: QualityArg,

    /// Password for the produced PDF (pdf-password).
    #[arg(long, env = "FILY_PASSWORD")]
    password: Option<String>,

    /// Requested output file name; `.pdf` is appended when missing.
    #[arg(long, env = "FILY_OUTPUT_NAME")]
    output_name: Option<String>,

    /// Write completed conversions to this CSV file.
    #[arg(long, env = "FILY_EXPORT_HISTORY")]
    export_history: Option<PathBuf>,

    /// List the N most recent conversions stored on the service and exit.
    #[arg(long, value_name = "N")]
    recent: Option<usize>,

    /// Delete a conversion on the service by its file id and exit.
    #[arg(long, value_name = "FILE_ID")]
    delete: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "FILY_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Output structured JSON instead of text.
    #[arg(long, env = "FILY_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "FILY_NO_PROGRESS")]
    no_progress: bool,

    /// Do not subscribe to the live progress stream.
    #[arg(long, env = "FILY_NO_STREAM")]
    no_stream: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FILY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FILY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ConversionTypeArg {
    AnyToPdf,
    PdfToWord,
    PdfPassword,
    PdfMerge,
}

impl From<ConversionTypeArg> for ConversionType {
    fn from(v: ConversionTypeArg) -> Self {
        match v {
            ConversionTypeArg::AnyToPdf => ConversionType::AnyToPdf,
            ConversionTypeArg::PdfToWord => ConversionType::PdfToWord,
            ConversionTypeArg::PdfPassword => ConversionType::PdfPassword,
            ConversionTypeArg::PdfMerge => ConversionType::PdfMerge,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Low,
    High,
}

impl From<QualityArg> for Quality {
    fn from(v: QualityArg) -> Self {
        match v {
            QualityArg::Low => Quality::Low,
            QualityArg::High => Quality::High,
        }
    }
}

/// Shape of `--json` output for a batch run.
#[derive(Serialize)]
struct JsonReport<'a> {
    summary: Option<&'a BatchSummary>,
    items: &'a [ItemSnapshot],
    rejected: &'a [Rejection],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active.
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

    // Only a batch run draws the bar; --recent and --delete print plain lines.
    let batch_mode = cli.recent.is_none() && cli.delete.is_none();
    let progress_bar = (show_progress && batch_mode).then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = progress_bar
        .clone()
        .map(|cb| cb as Arc<dyn BatchProgressCallback>);

    let config = build_config(&cli, progress_cb)?;
    let orchestrator = Orchestrator::new(config).context("Failed to create HTTP client")?;

    // ── Remote history modes ─────────────────────────────────────────────
    if let Some(limit) = cli.recent {
        let list = orchestrator
            .recent_conversions(limit)
            .await
            .context("Failed to fetch recent conversions")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&list).context("Failed to serialise history")?
            );
        } else if list.is_empty() {
            println!("No conversions on the service.");
        } else {
            for c in &list {
                println!(
                    "{}  {:<40}  {:>9}  {:<10}  {}",
                    c.file_id,
                    c.original_filename,
                    format_file_size(c.file_size),
                    c.status,
                    c.created_at.as_deref().unwrap_or("-"),
                );
            }
        }
        return Ok(());
    }

    if let Some(ref id) = cli.delete {
        orchestrator
            .delete_conversion(id)
            .await
            .with_context(|| format!("Failed to delete conversion {id}"))?;
        if !cli.quiet {
            eprintln!("{} Deleted {}", green("✔"), id);
        }
        return Ok(());
    }

    if cli.files.is_empty() {
        bail!("No input files given. Run `fily --help` for usage.");
    }

    // ── Queue files ──────────────────────────────────────────────────────
    let report = orchestrator
        .add_paths(&cli.files)
        .await
        .context("Failed to read input files")?;

    if !cli.quiet && !cli.json {
        for r in &report.rejected {
            eprintln!("{} Skipped {}: {}", red("✗"), r.name, r.reason);
        }
    }

    orchestrator.start().await;

    // ── Run batch ────────────────────────────────────────────────────────
    let options = build_options(&cli);
    let outcome = orchestrator.start_batch(options).await;
    orchestrator.shutdown().await;
    if outcome.is_skipped() {
        if let Some(ref cb) = progress_bar {
            cb.bar.finish_and_clear();
        }
    }

    let items = orchestrator.items();

    if let Some(ref path) = cli.export_history {
        orchestrator
            .export_history()
            .write_csv(path)
            .await
            .with_context(|| format!("Failed to export history to {}", path.display()))?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&JsonReport {
            summary: outcome.summary(),
            items: &items,
            rejected: &report.rejected,
        })
        .context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_results(&items);
        if !cli.quiet && !show_progress {
            if let BatchOutcome::Completed(ref s) = outcome {
                eprintln!(
                    "Converted {}/{} file(s) in {}ms",
                    s.completed, s.processed, s.duration_ms
                );
            }
        }
    }

    let failed = items
        .iter()
        .filter(|i| i.status == ItemStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{failed} file(s) failed to convert");
    }
    if report.accepted.is_empty() {
        bail!("No file was accepted for conversion");
    }

    Ok(())
}

/// One line per file on stdout: status, name and download link or error.
fn print_results(items: &[ItemSnapshot]) {
    for item in items {
        match item.status {
            ItemStatus::Completed => println!(
                "completed  {}  {}",
                item.name,
                item.download_ref.as_deref().unwrap_or("")
            ),
            ItemStatus::Failed => println!(
                "failed     {}  {}",
                item.name,
                item.error_detail.as_deref().unwrap_or("")
            ),
            other => println!("{:<10} {}", other.as_str(), item.name),
        }
    }
}

/// Map CLI args to `ServiceConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .base_url(cli.server.clone())
        .request_timeout_secs(cli.timeout)
        .progress_stream(!cli.no_stream);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `ConvertOptions`.
fn build_options(cli: &Cli) -> ConvertOptions {
    let mut options = ConvertOptions::new()
        .conversion_type(cli.conversion_type.into())
        .quality(cli.quality.into());
    if let Some(ref pwd) = cli.password {
        options = options.password(pwd.clone());
    }
    if let Some(ref name) = cli.output_name {
        options = options.output_name(name.clone());
    }
    options
}
