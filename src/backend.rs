//! Request/response wrapper around the remote conversion service.
//!
//! [`ConversionBackend`] is the seam the queue talks through; [`HttpBackend`]
//! is the real implementation over `reqwest`. Tests substitute an in-memory
//! backend. No method retries: a failed call is reported once and the queue
//! decides what happens to the file.
//!
//! ## Endpoints
//!
//! | Call | Request | Success body |
//! |------|---------|--------------|
//! | upload | `POST /upload` multipart `file` | `{"file_id": …}` |
//! | convert | `POST /convert` JSON | `{"download_url": …}` or `{"pdf_filename": …}` |
//! | cleanup | `POST /cleanup-files` | any 2xx |
//! | history | `GET /api/recent-conversions` | list, or `{"conversions": [...]}` |
//! | delete | `DELETE /api/delete-conversion/{id}` | `{"success": true}` |
//! | progress | `GET /stream-progress` | `text/event-stream` |
//!
//! Failure bodies carry `{"error": "…"}`; that text becomes the item's
//! error detail when present.

use crate::config::{ConvertOptions, ServiceConfig};
use crate::error::FilyError;
use crate::stream::ProgressChannel;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Operations the queue needs from the conversion service.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Upload a file and return the id the service assigned to it.
    async fn upload(
        &self,
        name: &str,
        media_type: Option<&str>,
        payload: Bytes,
    ) -> Result<String, FilyError>;

    /// Convert a previously uploaded file and return where to download it.
    async fn convert(
        &self,
        remote_file_id: &str,
        original_name: &str,
        options: &ConvertOptions,
    ) -> Result<String, FilyError>;

    /// Ask the service to purge old uploads and outputs.
    async fn cleanup(&self) -> Result<(), FilyError>;

    /// Recent conversions recorded by the service, newest first.
    async fn recent_conversions(&self) -> Result<Vec<RemoteConversion>, FilyError> {
        Err(FilyError::Transport {
            message: "conversion history is not available from this backend".into(),
        })
    }

    /// Delete a converted file on the service.
    async fn delete_conversion(&self, remote_file_id: &str) -> Result<(), FilyError> {
        let _ = remote_file_id;
        Err(FilyError::Transport {
            message: "deleting conversions is not supported by this backend".into(),
        })
    }

    /// Open the live progress subscription. Defaults to a silent channel.
    async fn subscribe_progress(&self) -> Result<ProgressChannel, FilyError> {
        Ok(ProgressChannel::empty())
    }
}

/// A conversion recorded in the service's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConversion {
    pub file_id: String,
    pub original_filename: String,
    pub status: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl RemoteConversion {
    /// `created_at` parsed as UTC. The service writes naive ISO-8601 UTC
    /// timestamps; RFC 3339 with an offset is accepted too.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    file_id: &'a str,
    original_filename: &'a str,
    conversion_type: &'a str,
    quality: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    download_url: Option<String>,
    pdf_filename: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecentResponse {
    List(Vec<RemoteConversion>),
    Envelope { conversions: Vec<RemoteConversion> },
    Failure { error: String },
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    success: bool,
    error: Option<String>,
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// [`ConversionBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: ServiceConfig,
    client: Client,
    /// No whole-request timeout: the progress stream stays open indefinitely.
    stream_client: Client,
}

impl HttpBackend {
    pub fn new(config: &ServiceConfig) -> Result<Self, FilyError> {
        let connect = Duration::from_secs(config.connect_timeout_secs);

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(connect)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FilyError::InvalidConfig(format!("HTTP client: {e}")))?;

        let stream_client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(connect)
            .build()
            .map_err(|e| FilyError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
            stream_client,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Make a server-relative download path absolute.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.config.endpoint(url)
        }
    }
}

#[async_trait]
impl ConversionBackend for HttpBackend {
    async fn upload(
        &self,
        name: &str,
        media_type: Option<&str>,
        payload: Bytes,
    ) -> Result<String, FilyError> {
        let url = self.config.endpoint("upload");
        debug!("Uploading '{}' ({} bytes) to {}", name, payload.len(), url);

        let len = payload.len() as u64;
        let mut part = multipart::Part::stream_with_length(payload, len).file_name(name.to_string());
        if let Some(mt) = media_type.filter(|m| !m.is_empty()) {
            part = part.mime_str(mt).map_err(|e| FilyError::Upload {
                message: format!("invalid media type '{mt}': {e}"),
            })?;
        }
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| FilyError::Upload {
                message: transport_message(&e),
            })?;

        let (status, body) = read_json::<UploadResponse>(response).await;
        match body {
            Some(UploadResponse {
                file_id: Some(id), ..
            }) if status.is_success() => {
                info!("Uploaded '{}' as {}", name, id);
                Ok(id)
            }
            Some(UploadResponse { error: Some(e), .. }) => Err(FilyError::Upload { message: e }),
            _ if status.is_success() => Err(FilyError::Upload {
                message: "service response did not include a file id".into(),
            }),
            _ => Err(FilyError::Upload {
                message: status_message(status),
            }),
        }
    }

    async fn convert(
        &self,
        remote_file_id: &str,
        original_name: &str,
        options: &ConvertOptions,
    ) -> Result<String, FilyError> {
        let url = self.config.endpoint("convert");
        let request = ConvertRequest {
            file_id: remote_file_id,
            original_filename: original_name,
            conversion_type: options.conversion_type.as_str(),
            quality: options.quality.as_str(),
            password: options.effective_password(),
            output_name: options.output_name.as_deref().and_then(normalize_output_name),
        };
        debug!(
            "Converting {} ({}, quality {})",
            remote_file_id, request.conversion_type, request.quality
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FilyError::Conversion {
                message: transport_message(&e),
            })?;

        let (status, body) = read_json::<ConvertResponse>(response).await;
        match body {
            Some(ConvertResponse { error: Some(e), .. }) if !status.is_success() => {
                Err(FilyError::Conversion { message: e })
            }
            Some(ConvertResponse {
                download_url: Some(u),
                ..
            }) if status.is_success() => Ok(self.absolute(&u)),
            Some(ConvertResponse {
                pdf_filename: Some(_),
                ..
            }) if status.is_success() => Ok(self
                .config
                .endpoint(&format!("download/{remote_file_id}"))),
            Some(ConvertResponse { error: Some(e), .. }) => Err(FilyError::Conversion { message: e }),
            _ if status.is_success() => Err(FilyError::Conversion {
                message: "service response did not include a download location".into(),
            }),
            _ => Err(FilyError::Conversion {
                message: status_message(status),
            }),
        }
    }

    async fn cleanup(&self) -> Result<(), FilyError> {
        let url = self.config.endpoint("cleanup-files");
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| FilyError::Cleanup {
                message: transport_message(&e),
            })?;

        if response.status().is_success() {
            debug!("Cleanup acknowledged");
            Ok(())
        } else {
            Err(FilyError::Cleanup {
                message: status_message(response.status()),
            })
        }
    }

    async fn recent_conversions(&self) -> Result<Vec<RemoteConversion>, FilyError> {
        let url = self.config.endpoint("api/recent-conversions");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FilyError::Transport {
                message: transport_message(&e),
            })?;

        let (status, body) = read_json::<RecentResponse>(response).await;
        match body {
            Some(RecentResponse::List(list)) | Some(RecentResponse::Envelope { conversions: list })
                if status.is_success() =>
            {
                Ok(list)
            }
            Some(RecentResponse::Failure { error }) => Err(FilyError::Transport { message: error }),
            _ if status.is_success() => Err(FilyError::Transport {
                message: "could not decode conversion history".into(),
            }),
            _ => Err(FilyError::Transport {
                message: status_message(status),
            }),
        }
    }

    async fn delete_conversion(&self, remote_file_id: &str) -> Result<(), FilyError> {
        let url = self
            .config
            .endpoint(&format!("api/delete-conversion/{remote_file_id}"));
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| FilyError::Transport {
                message: transport_message(&e),
            })?;

        let (status, body) = read_json::<DeleteResponse>(response).await;
        if status == StatusCode::NOT_FOUND {
            return Err(FilyError::NotFound {
                id: remote_file_id.to_string(),
            });
        }
        match body {
            Some(DeleteResponse { success: true, .. }) if status.is_success() => {
                info!("Deleted remote conversion {}", remote_file_id);
                Ok(())
            }
            Some(DeleteResponse { error: Some(e), .. }) => Err(FilyError::Transport { message: e }),
            _ => Err(FilyError::Transport {
                message: status_message(status),
            }),
        }
    }

    async fn subscribe_progress(&self) -> Result<ProgressChannel, FilyError> {
        let url = self.config.endpoint("stream-progress");
        let response = self
            .stream_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| FilyError::Transport {
                message: transport_message(&e),
            })?;

        if !response.status().is_success() {
            return Err(FilyError::Transport {
                message: format!("progress stream: {}", status_message(response.status())),
            });
        }

        debug!("Subscribed to progress stream at {}", url);
        Ok(ProgressChannel::from_sse(response.bytes_stream()))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

static UNSAFE_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Sanitise a requested output name and force a `.pdf` extension.
///
/// Returns `None` when nothing usable is left.
pub fn normalize_output_name(name: &str) -> Option<String> {
    let cleaned = UNSAFE_NAME_CHARS.replace_all(name.trim(), "");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.to_ascii_lowercase().ends_with(".pdf") {
        Some(cleaned.to_string())
    } else {
        Some(format!("{cleaned}.pdf"))
    }
}

/// Read the body as JSON, tolerating empty or non-JSON bodies.
async fn read_json<T: DeserializeOwned>(response: Response) -> (StatusCode, Option<T>) {
    let status = response.status();
    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            debug!("Failed to read response body: {}", e);
            return (status, None);
        }
    };
    (status, serde_json::from_slice(&body).ok())
}

fn status_message(status: StatusCode) -> String {
    format!(
        "service responded with HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

fn transport_message(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request to the conversion service timed out".to_string()
    } else if e.is_connect() {
        "could not connect to the conversion service".to_string()
    } else {
        format!("network error talking to the conversion service: {e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_is_sanitised() {
        assert_eq!(normalize_output_name("report"), Some("report.pdf".into()));
        assert_eq!(normalize_output_name("Report.PDF"), Some("Report.PDF".into()));
        assert_eq!(
            normalize_output_name("../q3 results?.docx"),
            Some("q3results.docx.pdf".into())
        );
        assert_eq!(normalize_output_name("  ///  "), None);
    }

    #[test]
    fn recent_response_accepts_both_shapes() {
        let list = r#"[{"file_id":"a","original_filename":"a.doc","status":"completed","file_size":12,"created_at":"2024-05-01T10:00:00.123456"}]"#;
        let parsed: RecentResponse = serde_json::from_str(list).unwrap();
        assert!(matches!(parsed, RecentResponse::List(ref v) if v.len() == 1));

        let env = r#"{"success":true,"conversions":[]}"#;
        let parsed: RecentResponse = serde_json::from_str(env).unwrap();
        assert!(matches!(parsed, RecentResponse::Envelope { ref conversions } if conversions.is_empty()));

        let err = r#"{"error":"Failed to load history"}"#;
        let parsed: RecentResponse = serde_json::from_str(err).unwrap();
        assert!(matches!(parsed, RecentResponse::Failure { .. }));
    }

    #[test]
    fn created_at_parses_naive_and_rfc3339() {
        let mut c = RemoteConversion {
            file_id: "a".into(),
            original_filename: "a.doc".into(),
            status: "completed".into(),
            file_size: 1,
            created_at: Some("2024-05-01T10:00:00.123456".into()),
        };
        let t = c.created_at_utc().unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00.123456+00:00");

        c.created_at = Some("2024-05-01T12:00:00+02:00".into());
        assert_eq!(c.created_at_utc().unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");

        c.created_at = Some("yesterday".into());
        assert!(c.created_at_utc().is_none());
    }

    #[test]
    fn status_message_mentions_code() {
        assert_eq!(
            status_message(StatusCode::INTERNAL_SERVER_ERROR),
            "service responded with HTTP 500 Internal Server Error"
        );
    }

    #[test]
    fn convert_request_omits_empty_password() {
        let opts = ConvertOptions::new().password("");
        let req = ConvertRequest {
            file_id: "f",
            original_filename: "a.docx",
            conversion_type: opts.conversion_type.as_str(),
            quality: opts.quality.as_str(),
            password: opts.effective_password(),
            output_name: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["conversion_type"], "any-to-pdf");
        assert_eq!(json["quality"], "high");
        assert!(json.get("password").is_none());
    }
}
