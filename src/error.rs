//! Error types for the fily-convert library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RejectReason`] — **Admission**: a file never entered the queue because
//!   it failed the size or type policy. Reported per file by
//!   [`crate::orchestrator::Orchestrator::add_files`].
//!
//! * [`FilyError`] — **Operational**: an upload, conversion, transport or
//!   configuration failure. Upload and conversion errors never escape a batch
//!   run; they are recorded on the affected item as its `error_detail` and the
//!   run moves on to the next file.
//!
//! Every [`FilyError`] maps to a stable [`ErrorKind`] so callers (and the
//! `--json` output of the CLI) can branch on the class without parsing text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All operational errors returned by the fily-convert library.
#[derive(Debug, Error)]
pub enum FilyError {
    // ── Admission ─────────────────────────────────────────────────────────
    /// The file was rejected by the validator.
    #[error("File '{name}' rejected: {reason}")]
    Validation { name: String, reason: RejectReason },

    // ── Remote service ────────────────────────────────────────────────────
    /// Upload returned a non-success response or never reached the service.
    #[error("Upload failed: {message}")]
    Upload { message: String },

    /// Convert returned a non-success response or never reached the service.
    #[error("Conversion failed: {message}")]
    Conversion { message: String },

    /// Network or stream failure outside the upload/convert pair
    /// (progress stream, history, delete).
    #[error("Transport error: {message}\nCheck that the conversion service is reachable.")]
    Transport { message: String },

    /// The periodic cleanup request failed. Always logged, never surfaced.
    #[error("Cleanup request failed: {message}")]
    Cleanup { message: String },

    // ── Queue ─────────────────────────────────────────────────────────────
    /// No item with this id is tracked by the queue.
    #[error("No queued file with id '{id}'")]
    NotFound { id: String },

    /// The requested transition is not allowed from the item's current status.
    #[error("Cannot {action} file '{id}' while it is {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: String,
    },

    // ── I/O ───────────────────────────────────────────────────────────────
    /// Could not read a source file from disk for upload.
    #[error("Failed to read source file '{path}': {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write an exported history file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FilyError {
    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FilyError::Validation { .. } => ErrorKind::Validation,
            FilyError::Upload { .. } => ErrorKind::Upload,
            FilyError::Conversion { .. } => ErrorKind::Conversion,
            FilyError::Transport { .. } => ErrorKind::Transport,
            FilyError::Cleanup { .. } => ErrorKind::Cleanup,
            FilyError::NotFound { .. } => ErrorKind::NotFound,
            FilyError::InvalidTransition { .. } => ErrorKind::InvalidState,
            FilyError::SourceRead { .. } | FilyError::OutputWriteFailed { .. } => ErrorKind::Io,
            FilyError::InvalidConfig(_) => ErrorKind::Config,
            FilyError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message that ends up in a failed item's `error_detail`.
    ///
    /// Remote messages are passed through verbatim; everything else uses the
    /// full `Display` text.
    pub fn detail(&self) -> String {
        match self {
            FilyError::Upload { message } | FilyError::Conversion { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "upload_error")]
    Upload,
    #[serde(rename = "conversion_error")]
    Conversion,
    #[serde(rename = "transport_error")]
    Transport,
    #[serde(rename = "cleanup_error")]
    Cleanup,
    NotFound,
    InvalidState,
    #[serde(rename = "io_error")]
    Io,
    #[serde(rename = "config_error")]
    Config,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Upload => "upload_error",
            ErrorKind::Conversion => "conversion_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Cleanup => "cleanup_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Io => "io_error",
            ErrorKind::Config => "config_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the validator refused a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Declared size is above the 50 MiB limit.
    #[error("file is too large (maximum size is 50 MB)")]
    TooLarge,

    /// Neither the media type nor the extension is on the allow-list.
    #[error("file type is not supported")]
    UnsupportedType,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::TooLarge => "too_large",
            RejectReason::UnsupportedType => "unsupported_type",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_detail_is_remote_message() {
        let e = FilyError::Upload {
            message: "File type not supported".into(),
        };
        assert_eq!(e.detail(), "File type not supported");
        assert!(e.to_string().starts_with("Upload failed"));
        assert_eq!(e.kind(), ErrorKind::Upload);
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(ErrorKind::Validation.as_str(), "validation_error");
        assert_eq!(ErrorKind::Transport.to_string(), "transport_error");
        let json = serde_json::to_string(&ErrorKind::Conversion).unwrap();
        assert_eq!(json, "\"conversion_error\"");
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }

    #[test]
    fn reject_reason_display() {
        assert!(RejectReason::TooLarge.to_string().contains("50 MB"));
        assert_eq!(RejectReason::UnsupportedType.as_str(), "unsupported_type");
        let json = serde_json::to_string(&RejectReason::TooLarge).unwrap();
        assert_eq!(json, "\"too_large\"");
    }

    #[test]
    fn invalid_transition_display() {
        let e = FilyError::InvalidTransition {
            id: "abc".into(),
            action: "retry",
            status: "uploading".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("retry"), "got: {msg}");
        assert!(msg.contains("uploading"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::InvalidState);
    }
}
