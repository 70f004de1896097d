//! Ordered batch queue and the sequential run loop.
//!
//! [`BatchQueue`] owns every [`ConversionItem`] of a session. A run walks the
//! queue from the first `queued` item to exhaustion, one file at a time:
//!
//! ```text
//! pick first queued ─▶ read source ─▶ upload ─▶ convert ─▶ next
//!                           │            │          │
//!                           └────────────┴──────────┴─▶ failed, next
//! ```
//!
//! The item list lives behind a `std::sync::Mutex` that is only held for
//! bookkeeping, never across a request. Items added or retried while a run
//! is active are picked up by that same run.

use crate::backend::ConversionBackend;
use crate::config::ConvertOptions;
use crate::error::{FilyError, RejectReason};
use crate::item::{ConversionItem, ItemId, ItemSnapshot, ItemStatus, SourceRef};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::stream::ProgressEvent;
use crate::validate::{validate, FileDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why [`BatchQueue::run`] did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run is in flight.
    AlreadyProcessing,
    /// No item is `queued`.
    EmptyQueue,
}

/// Totals for one finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Items the run picked up, including ones removed mid-flight.
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Items removed while their request was in flight; results discarded.
    pub discarded: usize,
    pub duration_ms: u64,
}

/// Result of asking the queue to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Skipped { reason: SkipReason },
    Completed(BatchSummary),
}

impl BatchOutcome {
    pub fn summary(&self) -> Option<&BatchSummary> {
        match self {
            BatchOutcome::Completed(s) => Some(s),
            BatchOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, BatchOutcome::Skipped { .. })
    }
}

/// What happened to a single item during a run.
enum ItemOutcome {
    Completed,
    Failed,
    Discarded,
}

/// Sets the processing flag for the lifetime of a run and clears it on drop,
/// whichever way the run ends.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The next item to work on, copied out of the lock.
struct Claim {
    id: ItemId,
    name: String,
    media_type: Option<String>,
    source: SourceRef,
}

/// Insertion-ordered collection of conversion items.
pub struct BatchQueue {
    items: Mutex<Vec<ConversionItem>>,
    processing: AtomicBool,
    callback: ProgressCallback,
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BatchQueue {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
            callback: callback.unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConversionItem>> {
        // A panic while holding the lock leaves the list structurally valid.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the item with `id`, if it is still tracked.
    fn with_item<R>(&self, id: &ItemId, f: impl FnOnce(&mut ConversionItem) -> R) -> Option<R> {
        let mut items = self.lock();
        items.iter_mut().find(|i| i.id() == id).map(f)
    }

    // ── Membership ───────────────────────────────────────────────────────

    /// Validate a file and append it as `queued`.
    pub fn enqueue(
        &self,
        descriptor: FileDescriptor,
        source: SourceRef,
    ) -> Result<ItemId, RejectReason> {
        validate(&descriptor)?;
        let item = ConversionItem::new(descriptor.name, descriptor.size, descriptor.media_type, source);
        let id = item.id().clone();
        debug!("Queued '{}' as {}", item.name(), id);
        self.lock().push(item);
        Ok(id)
    }

    /// Drop an item. A request already in flight for it completes, but its
    /// result is discarded.
    pub fn remove(&self, id: &ItemId) -> Result<ItemSnapshot, FilyError> {
        let mut items = self.lock();
        let pos = items
            .iter()
            .position(|i| i.id() == id)
            .ok_or_else(|| FilyError::NotFound { id: id.to_string() })?;
        let removed = items.remove(pos);
        debug!("Removed '{}' ({})", removed.name(), removed.status());
        Ok(removed.snapshot())
    }

    /// Drop every item. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }

    /// Put a `completed` or `failed` item back to `queued`.
    pub fn retry(&self, id: &ItemId) -> Result<(), FilyError> {
        self.with_item(id, |item| item.retry())
            .ok_or_else(|| FilyError::NotFound { id: id.to_string() })?
    }

    // ── Observation ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        self.lock().iter().map(ConversionItem::snapshot).collect()
    }

    pub fn get(&self, id: &ItemId) -> Option<ItemSnapshot> {
        self.with_item(id, |item| item.snapshot())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn queued_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|i| i.status() == ItemStatus::Queued)
            .count()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    // ── Pushed events ────────────────────────────────────────────────────

    /// Route a progress event to the item it refers to.
    ///
    /// The event id is matched against local ids and remote file ids. Unknown
    /// ids are ignored. Returns `true` if an item changed.
    pub fn apply_event(&self, event: &ProgressEvent) -> bool {
        let changed = {
            let mut items = self.lock();
            let Some(item) = items.iter_mut().find(|i| {
                i.id().as_str() == event.file_id || i.remote_file_id() == Some(event.file_id.as_str())
            }) else {
                debug!("Ignoring progress event for unknown file {}", event.file_id);
                return false;
            };
            if item.apply_event(event) {
                let snap = item.snapshot();
                Some((snap.name, snap.progress))
            } else {
                None
            }
        };

        match changed {
            Some((name, percent)) => {
                self.callback.on_item_progress(&name, percent);
                true
            }
            None => false,
        }
    }

    // ── Run loop ─────────────────────────────────────────────────────────

    /// Process every `queued` item in insertion order.
    ///
    /// Returns immediately with [`BatchOutcome::Skipped`] when a run is
    /// already active or nothing is queued. Upload and conversion failures
    /// are recorded on the item; they never abort the run.
    pub async fn run(&self, backend: &dyn ConversionBackend, options: &ConvertOptions) -> BatchOutcome {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            debug!("Batch already running; ignoring start request");
            return BatchOutcome::Skipped {
                reason: SkipReason::AlreadyProcessing,
            };
        };

        let mut total = self.queued_count();
        if total == 0 {
            return BatchOutcome::Skipped {
                reason: SkipReason::EmptyQueue,
            };
        }

        let started = Instant::now();
        info!("Starting batch: {} file(s), {}", total, options.conversion_type);
        self.callback.on_batch_start(total);

        let mut summary = BatchSummary::default();
        while let Some((claim, remaining)) = self.claim_next() {
            summary.processed += 1;
            let position = summary.processed;
            // Retries and additions made mid-run extend the total.
            total = total.max(position + remaining);

            match self.process(backend, options, &claim, position, total).await {
                ItemOutcome::Completed => summary.completed += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Discarded => summary.discarded += 1,
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Batch finished: {} completed, {} failed, {} discarded in {}ms",
            summary.completed, summary.failed, summary.discarded, summary.duration_ms
        );
        self.callback
            .on_batch_complete(summary.processed, summary.completed);
        BatchOutcome::Completed(summary)
    }

    /// Move the first `queued` item to `uploading` and copy out what the
    /// requests need. Also returns how many queued items remain after it.
    fn claim_next(&self) -> Option<(Claim, usize)> {
        let mut items = self.lock();
        let pos = items.iter().position(|i| i.status() == ItemStatus::Queued)?;
        let remaining = items[pos + 1..]
            .iter()
            .filter(|i| i.status() == ItemStatus::Queued)
            .count();

        let item = &mut items[pos];
        if let Err(e) = item.begin_upload() {
            warn!("Could not start '{}': {}", item.name(), e);
            return None;
        }
        let snap = item.snapshot();
        Some((
            Claim {
                id: snap.id,
                name: snap.name,
                media_type: snap.media_type,
                source: item.source().clone(),
            },
            remaining,
        ))
    }

    async fn process(
        &self,
        backend: &dyn ConversionBackend,
        options: &ConvertOptions,
        claim: &Claim,
        position: usize,
        total: usize,
    ) -> ItemOutcome {
        let name = claim.name.as_str();
        self.callback.on_item_start(position, total, name);
        self.callback
            .on_item_stage(position, total, name, ItemStatus::Uploading);
        debug!("[{}/{}] Uploading '{}'", position, total, name);

        let uploaded = match claim.source.read().await {
            Ok(payload) => {
                backend
                    .upload(name, claim.media_type.as_deref(), payload)
                    .await
            }
            Err(e) => Err(e),
        };
        let remote_id = match uploaded {
            Ok(remote_id) => remote_id,
            Err(e) => return self.record_failure(claim, e, position, total),
        };

        match self.with_item(&claim.id, |item| item.upload_succeeded(remote_id.clone())) {
            None => return self.discarded(claim),
            Some(Err(e)) => return self.record_failure(claim, e, position, total),
            Some(Ok(())) => {}
        }
        self.callback
            .on_item_stage(position, total, name, ItemStatus::Converting);
        debug!("[{}/{}] Converting '{}' (remote id {})", position, total, name, remote_id);

        let download_ref = match backend.convert(&remote_id, name, options).await {
            Ok(download_ref) => download_ref,
            Err(e) => return self.record_failure(claim, e, position, total),
        };

        let conversion_type = options.conversion_type;
        match self.with_item(&claim.id, |item| {
            item.convert_succeeded(download_ref.clone(), conversion_type)
        }) {
            None => self.discarded(claim),
            Some(Err(e)) => self.record_failure(claim, e, position, total),
            Some(Ok(())) => {
                info!("[{}/{}] Converted '{}'", position, total, name);
                self.callback
                    .on_item_complete(position, total, name, &download_ref);
                ItemOutcome::Completed
            }
        }
    }

    fn record_failure(
        &self,
        claim: &Claim,
        error: FilyError,
        position: usize,
        total: usize,
    ) -> ItemOutcome {
        let detail = error.detail();
        match self.with_item(&claim.id, |item| item.fail(detail.clone())) {
            None => self.discarded(claim),
            Some(result) => {
                if let Err(e) = result {
                    warn!("Could not mark '{}' failed: {}", claim.name, e);
                }
                warn!(
                    "[{}/{}] '{}' failed ({}): {}",
                    position,
                    total,
                    claim.name,
                    error.kind(),
                    detail
                );
                self.callback
                    .on_item_error(position, total, &claim.name, &detail);
                ItemOutcome::Failed
            }
        }
    }

    fn discarded(&self, claim: &Claim) -> ItemOutcome {
        debug!("'{}' was removed mid-run; discarding its result", claim.name);
        ItemOutcome::Discarded
    }
}
