//! The single entry point callers hold.
//!
//! An [`Orchestrator`] owns one [`BatchQueue`], one [`ConversionBackend`] and
//! the background tasks tied to them: the live progress listener and the
//! periodic cleanup sweep. Clones share state. Background tasks stop when
//! [`Orchestrator::shutdown`] is called or the last clone is dropped.
//!
//! ```rust,no_run
//! use fily_convert::{ConvertOptions, FileDescriptor, Orchestrator, ServiceConfig, SourceRef};
//!
//! # async fn run() -> Result<(), fily_convert::FilyError> {
//! let orchestrator = Orchestrator::new(ServiceConfig::builder().build()?)?;
//! orchestrator.start().await;
//!
//! let report = orchestrator.add_files(vec![(
//!     FileDescriptor::new("notes.txt", 5),
//!     SourceRef::from(b"hello".to_vec()),
//! )]);
//! assert!(report.rejected.is_empty());
//!
//! let outcome = orchestrator.start_batch(ConvertOptions::default()).await;
//! println!("{:?}", outcome.summary());
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::backend::{ConversionBackend, HttpBackend, RemoteConversion};
use crate::config::{ConvertOptions, ServiceConfig};
use crate::error::{FilyError, RejectReason};
use crate::history::HistorySnapshot;
use crate::item::{ItemId, ItemSnapshot, SourceRef};
use crate::queue::{BatchOutcome, BatchQueue};
use crate::validate::FileDescriptor;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A file refused at admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub reason: RejectReason,
}

impl Rejection {
    pub fn into_error(self) -> FilyError {
        FilyError::Validation {
            name: self.name,
            reason: self.reason,
        }
    }
}

/// Per-file outcome of [`Orchestrator::add_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReport {
    /// Ids of queued files, in the order given.
    pub accepted: Vec<ItemId>,
    pub rejected: Vec<Rejection>,
}

/// Build a descriptor and source for a file on disk.
///
/// The declared type is left empty so admission falls back to the extension.
pub async fn describe_path(path: impl AsRef<Path>) -> Result<(FileDescriptor, SourceRef), FilyError> {
    let path = path.as_ref();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|source| FilyError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((
        FileDescriptor::new(name, meta.len()),
        SourceRef::Path(path.to_path_buf()),
    ))
}

struct Inner {
    config: ServiceConfig,
    backend: Arc<dyn ConversionBackend>,
    queue: Arc<BatchQueue>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Batch conversion client.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Talk to the service at `config.base_url` over HTTP.
    pub fn new(config: ServiceConfig) -> Result<Self, FilyError> {
        let backend = HttpBackend::new(&config)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Use a caller-supplied backend.
    pub fn with_backend(config: ServiceConfig, backend: Arc<dyn ConversionBackend>) -> Self {
        let queue = Arc::new(BatchQueue::new(config.progress_callback.clone()));
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                queue,
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    // ── Queue operations ─────────────────────────────────────────────────

    /// Validate and queue files. Rejected files are reported and skipped.
    pub fn add_files(
        &self,
        files: impl IntoIterator<Item = (FileDescriptor, SourceRef)>,
    ) -> AddReport {
        let mut report = AddReport::default();
        for (descriptor, source) in files {
            let name = descriptor.name.clone();
            match self.inner.queue.enqueue(descriptor, source) {
                Ok(id) => report.accepted.push(id),
                Err(reason) => {
                    warn!("Rejected '{}': {}", name, reason);
                    report.rejected.push(Rejection { name, reason });
                }
            }
        }
        info!(
            "Added {} file(s), rejected {}",
            report.accepted.len(),
            report.rejected.len()
        );
        report
    }

    /// Queue files from disk. Files that cannot be read count as errors, not
    /// rejections, and stop the call.
    pub async fn add_paths<P: AsRef<Path>>(
        &self,
        paths: impl IntoIterator<Item = P>,
    ) -> Result<AddReport, FilyError> {
        let mut files = Vec::new();
        for path in paths {
            files.push(describe_path(path).await?);
        }
        Ok(self.add_files(files))
    }

    pub fn remove_file(&self, id: &ItemId) -> Result<ItemSnapshot, FilyError> {
        self.inner.queue.remove(id)
    }

    pub fn clear(&self) -> usize {
        let n = self.inner.queue.clear();
        debug!("Cleared {} file(s)", n);
        n
    }

    pub fn retry(&self, id: &ItemId) -> Result<(), FilyError> {
        self.inner.queue.retry(id)
    }

    /// Run every queued file through upload and conversion.
    ///
    /// A no-op when a batch is already running or nothing is queued.
    pub async fn start_batch(&self, options: ConvertOptions) -> BatchOutcome {
        self.inner
            .queue
            .run(self.inner.backend.as_ref(), &options)
            .await
    }

    pub fn items(&self) -> Vec<ItemSnapshot> {
        self.inner.queue.snapshot()
    }

    pub fn item(&self, id: &ItemId) -> Option<ItemSnapshot> {
        self.inner.queue.get(id)
    }

    pub fn is_processing(&self) -> bool {
        self.inner.queue.is_processing()
    }

    pub fn export_history(&self) -> HistorySnapshot {
        HistorySnapshot::from_items(&self.items())
    }

    // ── Remote history ───────────────────────────────────────────────────

    /// Up to `limit` of the service's most recent conversions.
    pub async fn recent_conversions(&self, limit: usize) -> Result<Vec<RemoteConversion>, FilyError> {
        let mut list = self.inner.backend.recent_conversions().await?;
        list.truncate(limit);
        Ok(list)
    }

    pub async fn delete_conversion(&self, remote_file_id: &str) -> Result<(), FilyError> {
        self.inner.backend.delete_conversion(remote_file_id).await?;
        info!("Deleted remote conversion {}", remote_file_id);
        Ok(())
    }

    // ── Background tasks ─────────────────────────────────────────────────

    /// Start the cleanup sweep and, if enabled, the progress listener.
    ///
    /// A progress subscription that cannot be opened is logged; the queue
    /// then relies on synchronous responses alone. Only the first call on
    /// any clone does anything.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            debug!("Background tasks already started");
            return;
        }
        self.spawn_cleanup_sweep();
        if self.inner.config.progress_stream {
            if let Err(e) = self.subscribe_progress().await {
                warn!("Live progress unavailable: {}", e);
            }
        }
    }

    /// Open the progress subscription and feed its events into the queue.
    pub async fn subscribe_progress(&self) -> Result<(), FilyError> {
        let mut channel = self.inner.backend.subscribe_progress().await?;
        let queue = Arc::clone(&self.inner.queue);
        let token = self.inner.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = channel.next() => match next {
                        Some(event) => {
                            queue.apply_event(&event);
                        }
                        None => {
                            warn!("Progress stream ended; using synchronous updates only");
                            break;
                        }
                    },
                }
            }
        });
        self.track(handle);
        Ok(())
    }

    /// Call `cleanup` on the backend every `config.cleanup_interval`.
    /// Failures are logged and the sweep keeps going.
    pub fn spawn_cleanup_sweep(&self) {
        let backend = Arc::clone(&self.inner.backend);
        let token = self.inner.shutdown.clone();
        let period = self.inner.config.cleanup_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first sweep waits a full period.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            result = backend.cleanup() => match result {
                                Ok(()) => debug!("Cleanup sweep done"),
                                Err(e) => warn!("{}", e),
                            },
                        }
                    }
                }
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        debug!("Orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingBackend {
        cleanups: AtomicUsize,
        hang_cleanup: bool,
    }

    #[async_trait]
    impl ConversionBackend for CountingBackend {
        async fn upload(
            &self,
            _name: &str,
            _media_type: Option<&str>,
            _payload: Bytes,
        ) -> Result<String, FilyError> {
            Ok("r".into())
        }

        async fn convert(
            &self,
            id: &str,
            _original_name: &str,
            _options: &ConvertOptions,
        ) -> Result<String, FilyError> {
            Ok(format!("/download/{id}"))
        }

        async fn cleanup(&self) -> Result<(), FilyError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.hang_cleanup {
                std::future::pending::<()>().await;
            }
            Err(FilyError::Cleanup {
                message: "service busy".into(),
            })
        }
    }

    fn config(interval: Duration) -> ServiceConfig {
        ServiceConfig::builder()
            .cleanup_interval(interval)
            .progress_stream(false)
            .build()
            .unwrap()
    }

    #[test]
    fn add_files_reports_rejections_individually() {
        let o = Orchestrator::with_backend(config(Duration::from_secs(60)), Arc::new(CountingBackend::default()));
        let report = o.add_files(vec![
            (FileDescriptor::new("a.pdf", 1), SourceRef::from(b"a".to_vec())),
            (FileDescriptor::new("b.exe", 1), SourceRef::from(b"b".to_vec())),
            (
                FileDescriptor::new("c.pdf", 60 * 1024 * 1024),
                SourceRef::from(b"c".to_vec()),
            ),
        ]);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(
            report.rejected,
            vec![
                Rejection {
                    name: "b.exe".into(),
                    reason: RejectReason::UnsupportedType
                },
                Rejection {
                    name: "c.pdf".into(),
                    reason: RejectReason::TooLarge
                },
            ]
        );
        assert_eq!(o.items().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_sweep_runs_periodically_and_swallows_errors() {
        let backend = Arc::new(CountingBackend::default());
        let o = Orchestrator::with_backend(config(Duration::from_secs(300)), backend.clone());
        o.spawn_cleanup_sweep();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 3);

        o.shutdown().await;
        tokio::time::sleep(Duration::from_secs(900)).await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_across_clones() {
        let backend = Arc::new(CountingBackend::default());
        let o = Orchestrator::with_backend(config(Duration::from_secs(300)), backend.clone());
        o.start().await;
        o.start().await;
        o.clone().start().await;

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(o.inner.tasks.lock().unwrap().len(), 1);
        o.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_in_flight_cleanup() {
        let backend = Arc::new(CountingBackend {
            hang_cleanup: true,
            ..Default::default()
        });
        let o = Orchestrator::with_backend(config(Duration::from_secs(300)), backend.clone());
        o.spawn_cleanup_sweep();

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(backend.cleanups.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(1), o.shutdown())
            .await
            .expect("shutdown should not wait on a hung cleanup");
    }

    #[tokio::test]
    async fn describe_path_reads_size_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let (desc, source) = describe_path(&path).await.unwrap();
        assert_eq!(desc.name, "memo.docx");
        assert_eq!(desc.size, 5);
        assert!(desc.media_type.is_none());
        assert!(matches!(source, SourceRef::Path(_)));

        let err = describe_path(dir.path().join("missing.pdf")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}
