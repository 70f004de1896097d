//! Configuration types for the conversion client.
//!
//! Two structs carry every knob:
//!
//! * [`ServiceConfig`] — where the remote service lives and how the client
//!   talks to it (timeouts, cleanup cadence, live progress). Built once via
//!   [`ServiceConfigBuilder`] and shared by the orchestrator.
//! * [`ConvertOptions`] — what each `convert` request asks for. Passed to
//!   [`crate::orchestrator::Orchestrator::start_batch`] so the options in
//!   effect are the ones current when the batch starts, not when a file was
//!   queued.

use crate::error::FilyError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default interval between background `cleanup-files` requests.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for talking to the remote conversion service.
///
/// # Example
/// ```rust
/// use fily_convert::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .base_url("http://localhost:5000")
///     .request_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url, "http://localhost:5000");
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Root URL of the service, without a trailing slash. Default: `http://127.0.0.1:5000`.
    pub base_url: String,

    /// Whole-request timeout in seconds applied by the HTTP client. Default: 300.
    ///
    /// Conversions of large office documents can take minutes on the server;
    /// the batch loop itself imposes no deadline, so this is the only bound
    /// on a hung request.
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds. Default: 10.
    pub connect_timeout_secs: u64,

    /// How often the background sweep asks the service to purge old files. Default: 5 minutes.
    pub cleanup_interval: Duration,

    /// Subscribe to the server-sent progress stream. Default: true.
    ///
    /// When disabled (or when the stream drops), item status comes solely from
    /// the synchronous upload/convert responses.
    pub progress_stream: bool,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Optional progress callback for batch and per-file events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            request_timeout_secs: 300,
            connect_timeout_secs: 10,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            progress_stream: true,
            user_agent: concat!("fily-convert/", env!("CARGO_PKG_VERSION")).to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("progress_stream", &self.progress_stream)
            .field("user_agent", &self.user_agent)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Join a relative endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn progress_stream(mut self, v: bool) -> Self {
        self.config.progress_stream = v;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, FilyError> {
        let c = &self.config;
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(FilyError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(FilyError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.cleanup_interval.is_zero() {
            return Err(FilyError::InvalidConfig(
                "cleanup interval must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Convert options ──────────────────────────────────────────────────────

/// Options sent with every `convert` request in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Transform to apply. Default: [`ConversionType::AnyToPdf`].
    pub conversion_type: ConversionType,

    /// Output quality. Default: [`Quality::High`].
    pub quality: Quality,

    /// Password to protect the produced PDF with. Empty means none.
    pub password: Option<String>,

    /// Requested output file name. `.pdf` is appended when missing.
    pub output_name: Option<String>,
}

impl ConvertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversion_type(mut self, t: ConversionType) -> Self {
        self.conversion_type = t;
        self
    }

    pub fn quality(mut self, q: Quality) -> Self {
        self.quality = q;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.password = Some(pwd.into());
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    /// The password to send, treating an empty string as "no password".
    pub fn effective_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// Supported server-side transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionType {
    /// Convert any supported document or image to PDF. (default)
    #[default]
    AnyToPdf,
    /// Convert a PDF back into a Word document.
    PdfToWord,
    /// Add a password to an existing PDF.
    PdfPassword,
    /// Merge several PDFs into one.
    PdfMerge,
}

impl ConversionType {
    pub const ALL: [ConversionType; 4] = [
        ConversionType::AnyToPdf,
        ConversionType::PdfToWord,
        ConversionType::PdfPassword,
        ConversionType::PdfMerge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::AnyToPdf => "any-to-pdf",
            ConversionType::PdfToWord => "pdf-to-word",
            ConversionType::PdfPassword => "pdf-password",
            ConversionType::PdfMerge => "pdf-merge",
        }
    }

    /// Short human description, as shown in the service's operation picker.
    pub fn description(&self) -> &'static str {
        match self {
            ConversionType::AnyToPdf => "Convert Any File to PDF",
            ConversionType::PdfToWord => "Convert PDF to Word",
            ConversionType::PdfPassword => "Add Password to PDF",
            ConversionType::PdfMerge => "Merge Multiple PDFs",
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionType {
    type Err = FilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        ConversionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FilyError::InvalidConfig(format!("unknown conversion type '{s}'")))
    }
}

/// Output quality requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    /// (default)
    #[default]
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::High => "high",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = FilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "high" => Ok(Quality::High),
            other => Err(FilyError::InvalidConfig(format!(
                "quality must be 'low' or 'high', got '{other}'"
            ))),
        }
    }
}
