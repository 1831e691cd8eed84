//! Durable local capture records.
//!
//! A capture is recorded in two steps: the image file is written first, then
//! one structured entry referencing it is appended to the capture log. The
//! log line is never written without its image.

use crate::camera::StillImage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Errors that can occur while recording a capture locally.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("failed to write capture image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image saved to {image_path} but the capture log append failed: {source}")]
    LogWrite {
        image_path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One measurement event, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Unique record ID
    pub record_id: Uuid,
    /// Item label chosen by the operator
    pub label: String,
    /// Stable weight in grams
    pub weight_grams: f64,
    /// Wall-clock capture time
    pub timestamp: DateTime<Utc>,
    /// Path of the locally saved image
    pub image_path: PathBuf,
}

/// Writes capture images and appends entries to the local capture log.
pub struct CaptureRecorder {
    image_dir: PathBuf,
    log_path: PathBuf,
}

impl CaptureRecorder {
    /// Create a new recorder writing under the given paths.
    pub fn new(image_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            log_path: log_path.into(),
        }
    }

    /// Generate the image filename for a capture.
    ///
    /// Format: `{label}_{date}_{time}{ms}_{record_id}.{ext}` so same-label
    /// repeats within the same second stay distinguishable.
    fn image_filename(
        &self,
        label: &str,
        timestamp: DateTime<Utc>,
        record_id: Uuid,
        extension: &str,
    ) -> String {
        format!(
            "{label}_{stamp}_{record_id}.{extension}",
            label = sanitize_label(label),
            stamp = timestamp.format("%Y%m%d_%H%M%S%3f"),
        )
    }

    /// Record one capture: write the image, then append the log entry.
    ///
    /// An image write failure aborts before the log is touched. A log append
    /// failure after the image was written is its own error; the image is
    /// left on disk and the caller reports the save as failed.
    #[instrument(skip(self, image), fields(label = %label))]
    pub async fn record(
        &self,
        label: &str,
        weight_grams: f64,
        image: &StillImage,
    ) -> Result<CaptureRecord, RecorderError> {
        let record_id = Uuid::new_v4();
        let timestamp = Utc::now();
        let filename = self.image_filename(label, timestamp, record_id, image.extension());
        let image_path = self.image_dir.join(filename);

        self.write_image(&image_path, &image.data).await?;

        let record = CaptureRecord {
            record_id,
            label: label.to_string(),
            weight_grams,
            timestamp,
            image_path: image_path.clone(),
        };

        if let Err(source) = self.append_log_entry(&record).await {
            warn!(
                image_path = %image_path.display(),
                error = %source,
                "capture log append failed after image write"
            );
            metrics::counter!("kiosk.captures.log_failed").increment(1);
            return Err(RecorderError::LogWrite { image_path, source });
        }

        metrics::counter!("kiosk.captures.recorded").increment(1);
        info!(
            record_id = %record.record_id,
            image_path = %record.image_path.display(),
            weight_grams = record.weight_grams,
            "capture recorded"
        );

        Ok(record)
    }

    async fn write_image(&self, path: &Path, data: &[u8]) -> Result<(), RecorderError> {
        let map_err = |source| RecorderError::ImageWrite {
            path: path.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(&self.image_dir)
            .await
            .map_err(map_err)?;

        let mut file = tokio::fs::File::create(path).await.map_err(map_err)?;
        file.write_all(data).await.map_err(map_err)?;
        file.sync_all().await.map_err(map_err)?;

        Ok(())
    }

    async fn append_log_entry(&self, record: &CaptureRecord) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_all().await?;

        Ok(())
    }
}

/// Sanitize a label for use as a path component.
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
