//! Admission policy: decide whether a file may enter the queue.
//!
//! Browsers and file pickers often report an empty or generic media type
//! (`application/octet-stream`) for perfectly ordinary office files, so the
//! media type alone is not trusted: a file is accepted when either its
//! declared type or its extension is on the allow-list. Size is checked first
//! and wins over everything else.

use crate::error::RejectReason;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Largest file the service accepts: 50 MiB.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

const MEDIA_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
    "image/jpeg",
    "image/png",
    "image/gif",
    "text/csv",
];

const EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt", "ods", "odp", "csv",
    "html", "htm", "xml", "json", "md", "py", "js", "css", "jpg", "jpeg", "png", "gif", "bmp",
    "tiff",
];

static MEDIA_TYPE_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| MEDIA_TYPES.iter().copied().collect());
static EXTENSION_SET: Lazy<HashSet<&'static str>> = Lazy::new(|| EXTENSIONS.iter().copied().collect());

/// Metadata describing a candidate file, as known before upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// File name including extension, e.g. `report.docx`.
    pub name: String,
    /// Size in bytes as reported by the caller.
    pub size: u64,
    /// Declared media type, if any. `None` or an empty string means unknown.
    pub media_type: Option<String>,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            media_type: None,
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Lower-cased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

/// Check a file against the size limit and the type allow-lists.
pub fn validate(file: &FileDescriptor) -> Result<(), RejectReason> {
    if file.size > MAX_FILE_SIZE {
        return Err(RejectReason::TooLarge);
    }

    let type_ok = file
        .media_type
        .as_deref()
        .is_some_and(is_supported_media_type);

    if type_ok || file.extension().is_some_and(|ext| is_supported_extension(&ext)) {
        Ok(())
    } else {
        Err(RejectReason::UnsupportedType)
    }
}

pub fn is_supported_media_type(media_type: &str) -> bool {
    // Drop parameters such as "; charset=utf-8".
    let essence = media_type.split(';').next().unwrap_or("").trim();
    MEDIA_TYPE_SET.contains(essence.to_ascii_lowercase().as_str())
}

/// `ext` may be given with or without the leading dot.
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    EXTENSION_SET.contains(ext.as_str())
}

pub fn supported_extensions() -> &'static [&'static str] {
    EXTENSIONS
}

pub fn supported_media_types() -> &'static [&'static str] {
    MEDIA_TYPES
}

/// Text after the last `.` of the final path component. A bare dotfile such
/// as `.pdf` counts as having extension `pdf`.
fn file_extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Format a byte count for humans: `0 B`, `512 B`, `1.5 KB`, `2.0 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
