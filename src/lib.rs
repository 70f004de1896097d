//! # fily-convert
//!
//! Batch client for a remote document/image → PDF conversion service.
//!
//! ## Why this crate?
//!
//! The service converts one file per request and reports progress over a
//! separate server-sent-events stream. Driving a dozen files through it by
//! hand means juggling uploads, conversions, partial failures and a progress
//! feed that may drop at any moment. This crate keeps a queue of files,
//! walks them through the service one at a time, and tells you exactly which
//! ones made it.
//!
//! ## Lifecycle of a file
//!
//! ```text
//! add_files
//!  │
//!  ├─ 1. Validate  size ≤ 50 MiB, media type or extension on the allow-list
//!  ├─ 2. Queue     insertion order, one batch run at a time
//!  ├─ 3. Upload    POST /upload              → remote file id
//!  ├─ 4. Convert   POST /convert             → download URL
//!  ├─ 5. Progress  GET  /stream-progress     (advisory, may drop)
//!  └─ 6. Export    completed items as CSV
//! ```
//!
//! A failed upload or conversion fails only that file; the run moves on.
//! Failed and completed files can be retried.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fily_convert::{ConvertOptions, Orchestrator, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .base_url("http://localhost:5000")
//!         .build()?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     orchestrator.start().await;
//!
//!     let report = orchestrator.add_paths(["report.docx", "scan.png"]).await?;
//!     for rejected in &report.rejected {
//!         eprintln!("skipped {}: {}", rejected.name, rejected.reason);
//!     }
//!
//!     orchestrator.start_batch(ConvertOptions::default()).await;
//!     for item in orchestrator.items() {
//!         println!("{} → {:?}", item.name, item.download_ref);
//!     }
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fily` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fily-convert = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod item;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod stream;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{normalize_output_name, ConversionBackend, HttpBackend, RemoteConversion};
pub use config::{
    ConversionType, ConvertOptions, Quality, ServiceConfig, ServiceConfigBuilder,
    DEFAULT_CLEANUP_INTERVAL,
};
pub use error::{ErrorKind, FilyError, RejectReason};
pub use history::{HistoryRow, HistorySnapshot};
pub use item::{ItemId, ItemSnapshot, ItemStatus, SourceRef};
pub use orchestrator::{describe_path, AddReport, Orchestrator, Rejection};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use queue::{BatchOutcome, BatchQueue, BatchSummary, SkipReason};
pub use stream::{ProgressChannel, ProgressEvent};
pub use validate::{format_file_size, validate, FileDescriptor, MAX_FILE_SIZE};
