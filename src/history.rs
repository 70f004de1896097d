//! Export of completed conversions as a table.

use crate::config::ConversionType;
use crate::error::FilyError;
use crate::item::{ItemId, ItemSnapshot, ItemStatus};
use crate::validate::format_file_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const CSV_HEADER: [&str; 4] = ["File Name", "Size", "Status", "Conversion Type"];

/// One completed conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub id: ItemId,
    pub name: String,
    pub size: u64,
    pub status: ItemStatus,
    pub conversion_type: ConversionType,
    pub download_ref: String,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Completed items at the moment of export, in queue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<HistoryRow>,
}

impl HistorySnapshot {
    /// Keep only `completed` items.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a ItemSnapshot>) -> Self {
        let rows = items
            .into_iter()
            .filter(|s| s.status == ItemStatus::Completed)
            .filter_map(|s| {
                Some(HistoryRow {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    size: s.size,
                    status: s.status,
                    conversion_type: s.conversion_type.unwrap_or_default(),
                    download_ref: s.download_ref.clone()?,
                    completed_at: s.completed_at,
                })
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as CSV. Every field is quoted; embedded quotes are doubled.
    pub fn to_csv(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(csv_line(CSV_HEADER));
        for row in &self.rows {
            let size = format_file_size(row.size);
            lines.push(csv_line([
                row.name.as_str(),
                size.as_str(),
                row.status.as_str(),
                row.conversion_type.as_str(),
            ]));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Write [`Self::to_csv`] to `path` through a temp file and rename.
    pub async fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), FilyError> {
        let path = path.as_ref();
        let write_err = |source: std::io::Error| FilyError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = path.with_extension("csv.tmp");
        tokio::fs::write(&tmp_path, self.to_csv())
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(write_err)?;

        info!("Exported {} conversion(s) to {}", self.rows.len(), path.display());
        Ok(())
    }
}

fn csv_line<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    fields
        .into_iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, size: u64, t: ConversionType) -> HistoryRow {
        HistoryRow {
            id: ItemId::new(),
            name: name.into(),
            size,
            status: ItemStatus::Completed,
            conversion_type: t,
            download_ref: "http://svc/download/x".into(),
            completed_at: None,
        }
    }

    #[test]
    fn csv_quotes_every_field() {
        let snap = HistorySnapshot {
            generated_at: Utc::now(),
            rows: vec![
                row("report.docx", 1536, ConversionType::AnyToPdf),
                row("say \"hi\".txt", 10, ConversionType::PdfPassword),
            ],
        };
        let csv = snap.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "\"File Name\",\"Size\",\"Status\",\"Conversion Type\"");
        assert_eq!(lines[1], "\"report.docx\",\"1.5 KB\",\"completed\",\"any-to-pdf\"");
        assert_eq!(lines[2], "\"say \"\"hi\"\".txt\",\"10 B\",\"completed\",\"pdf-password\"");
    }

    #[test]
    fn empty_snapshot_is_header_only() {
        let snap = HistorySnapshot::from_items(&Vec::<ItemSnapshot>::new());
        assert!(snap.is_empty());
        assert_eq!(snap.to_csv().lines().count(), 1);
    }

    #[tokio::test]
    async fn write_csv_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("history.csv");
        let snap = HistorySnapshot {
            generated_at: Utc::now(),
            rows: vec![row("a.png", 2048, ConversionType::AnyToPdf)],
        };
        snap.write_csv(&path).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("\"a.png\",\"2.0 KB\""));
        assert!(!path.with_extension("csv.tmp").exists());
    }
}
