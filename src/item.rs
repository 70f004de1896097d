//! The unit of work tracked by the batch queue, and its state machine.
//!
//! ```text
//!            ┌──────────────── retry ────────────────┐
//!            ▼                                       │
//!  queued ──▶ uploading ──▶ converting ──▶ completed ┤
//!               │               │                    │
//!               └───────────────┴──────▶ failed ─────┘
//! ```
//!
//! Every mutator is `pub(crate)`: only [`crate::queue::BatchQueue`] drives
//! transitions. Callers see items through [`ItemSnapshot`], a plain clone.
//! Each transition keeps the field invariants intact:
//!
//! * `remote_file_id` is set only while `converting` or `completed`
//! * `download_ref` is set only while `completed`
//! * `error_detail` is set only while `failed`
//! * `progress` never decreases except on retry, where it goes back to 0

use crate::config::ConversionType;
use crate::error::FilyError;
use crate::stream::ProgressEvent;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Locally generated identifier, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handle to the raw bytes of a queued file.
#[derive(Debug, Clone)]
pub enum SourceRef {
    /// File on local disk; read when the upload starts.
    Path(PathBuf),
    /// Bytes already in memory. Cloning is cheap (reference counted).
    Memory(Bytes),
}

impl SourceRef {
    /// Load the payload for upload.
    pub async fn read(&self) -> Result<Bytes, FilyError> {
        match self {
            SourceRef::Memory(bytes) => Ok(bytes.clone()),
            SourceRef::Path(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|source| FilyError::SourceRead {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

impl From<PathBuf> for SourceRef {
    fn from(p: PathBuf) -> Self {
        SourceRef::Path(p)
    }
}

impl From<Vec<u8>> for SourceRef {
    fn from(v: Vec<u8>) -> Self {
        SourceRef::Memory(Bytes::from(v))
    }
}

impl From<Bytes> for SourceRef {
    fn from(b: Bytes) -> Self {
        SourceRef::Memory(b)
    }
}

/// Lifecycle status of a conversion item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Queued,
    Uploading,
    Converting,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Converting => "converting",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }

    /// Position along the happy path; used to refuse backward moves.
    fn rank(&self) -> u8 {
        match self {
            ItemStatus::Queued => 0,
            ItemStatus::Uploading => 1,
            ItemStatus::Converting => 2,
            ItemStatus::Completed | ItemStatus::Failed => 3,
        }
    }

    /// Map a status string pushed by the service onto a local status.
    ///
    /// The service reports `pending`/`initializing` while a job waits for a
    /// converter; those count as converting. Unknown strings map to `None`.
    pub fn from_remote(s: &str) -> Option<ItemStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(ItemStatus::Queued),
            "uploading" => Some(ItemStatus::Uploading),
            "converting" | "pending" | "initializing" | "processing" => {
                Some(ItemStatus::Converting)
            }
            "completed" | "done" => Some(ItemStatus::Completed),
            "failed" | "error" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress shown when a synchronous stage begins, before any pushed event.
const UPLOAD_STARTED: u8 = 10;
const CONVERT_STARTED: u8 = 50;

/// A file being tracked through upload and conversion.
#[derive(Debug, Clone)]
pub struct ConversionItem {
    id: ItemId,
    source: SourceRef,
    name: String,
    size: u64,
    media_type: Option<String>,
    status: ItemStatus,
    progress: u8,
    message: Option<String>,
    remote_file_id: Option<String>,
    download_ref: Option<String>,
    conversion_type: Option<ConversionType>,
    error_detail: Option<String>,
    added_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    attempts: u32,
}

impl ConversionItem {
    pub(crate) fn new(
        name: impl Into<String>,
        size: u64,
        media_type: Option<String>,
        source: SourceRef,
    ) -> Self {
        Self {
            id: ItemId::new(),
            source,
            name: name.into(),
            size,
            media_type,
            status: ItemStatus::Queued,
            progress: 0,
            message: None,
            remote_file_id: None,
            download_ref: None,
            conversion_type: None,
            error_detail: None,
            added_at: Utc::now(),
            completed_at: None,
            attempts: 0,
        }
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn remote_file_id(&self) -> Option<&str> {
        self.remote_file_id.as_deref()
    }

    pub(crate) fn source(&self) -> &SourceRef {
        &self.source
    }

    /// Read-only copy for display. Excludes the payload handle.
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            media_type: self.media_type.clone(),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            remote_file_id: self.remote_file_id.clone(),
            download_ref: self.download_ref.clone(),
            conversion_type: self.conversion_type,
            error_detail: self.error_detail.clone(),
            added_at: self.added_at,
            completed_at: self.completed_at,
            attempts: self.attempts,
        }
    }

    fn raise_progress(&mut self, to: u8) {
        self.progress = self.progress.max(to.min(100));
    }

    // ── Synchronous transitions ──────────────────────────────────────────

    /// `queued → uploading`.
    pub(crate) fn begin_upload(&mut self) -> Result<(), FilyError> {
        self.expect_status(ItemStatus::Queued, "upload")?;
        self.status = ItemStatus::Uploading;
        self.attempts += 1;
        self.raise_progress(UPLOAD_STARTED);
        self.message = Some("Uploading…".to_string());
        Ok(())
    }

    /// `uploading → converting`, recording the id the service assigned.
    ///
    /// An item already moved to `converting` by a pushed event is accepted.
    pub(crate) fn upload_succeeded(&mut self, remote_file_id: String) -> Result<(), FilyError> {
        if !matches!(self.status, ItemStatus::Uploading | ItemStatus::Converting) {
            return Err(self.invalid("convert"));
        }
        self.status = ItemStatus::Converting;
        self.remote_file_id = Some(remote_file_id);
        self.raise_progress(CONVERT_STARTED);
        self.message = Some("Converting…".to_string());
        Ok(())
    }

    /// `converting → completed`.
    pub(crate) fn convert_succeeded(
        &mut self,
        download_ref: String,
        conversion_type: ConversionType,
    ) -> Result<(), FilyError> {
        self.expect_status(ItemStatus::Converting, "complete")?;
        self.status = ItemStatus::Completed;
        self.download_ref = Some(download_ref);
        self.conversion_type = Some(conversion_type);
        self.progress = 100;
        self.message = Some("Conversion completed".to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `uploading | converting → failed`.
    ///
    /// The remote file id is dropped: a failed item is re-uploaded on retry.
    pub(crate) fn fail(&mut self, detail: String) -> Result<(), FilyError> {
        if !matches!(self.status, ItemStatus::Uploading | ItemStatus::Converting) {
            return Err(self.invalid("fail"));
        }
        self.status = ItemStatus::Failed;
        self.remote_file_id = None;
        self.message = Some(detail.clone());
        self.error_detail = Some(detail);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `completed | failed → queued`, resetting per-attempt state.
    pub(crate) fn retry(&mut self) -> Result<(), FilyError> {
        if !self.status.is_terminal() {
            return Err(self.invalid("retry"));
        }
        self.status = ItemStatus::Queued;
        self.progress = 0;
        self.message = None;
        self.remote_file_id = None;
        self.download_ref = None;
        self.conversion_type = None;
        self.error_detail = None;
        self.completed_at = None;
        Ok(())
    }

    // ── Pushed events ────────────────────────────────────────────────────

    /// Fold a pushed progress event into this item.
    ///
    /// Events are advisory. Terminal items ignore them, status only moves
    /// forward between `uploading` and `converting`, progress only rises,
    /// and a pushed `completed`/`failed` never ends the item by itself; the
    /// synchronous response does that. Returns `true` if anything changed.
    pub(crate) fn apply_event(&mut self, event: &ProgressEvent) -> bool {
        if self.status.is_terminal() || self.status == ItemStatus::Queued {
            return false;
        }

        let before = (self.status, self.progress, self.message.clone());

        if let Some(pushed) = ItemStatus::from_remote(&event.status) {
            if !pushed.is_terminal() && pushed.rank() > self.status.rank() {
                self.status = pushed;
            }
        }
        self.raise_progress(event.percent());
        if !event.message.is_empty() {
            self.message = Some(event.message.clone());
        }

        before != (self.status, self.progress, self.message.clone())
    }

    fn expect_status(&self, expected: ItemStatus, action: &'static str) -> Result<(), FilyError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> FilyError {
        FilyError::InvalidTransition {
            id: self.id.to_string(),
            action,
            status: self.status.to_string(),
        }
    }
}

/// Read-only view of a [`ConversionItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub name: String,
    pub size: u64,
    pub media_type: Option<String>,
    pub status: ItemStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub remote_file_id: Option<String>,
    pub download_ref: Option<String>,
    /// Transform applied, set once the item completes.
    pub conversion_type: Option<ConversionType>,
    pub error_detail: Option<String>,
    pub added_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times this item has started an upload.
    pub attempts: u32,
}
