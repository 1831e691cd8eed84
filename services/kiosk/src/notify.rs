//! One-way notifications to the operator-facing display layer.
//!
//! The core pushes readings and outcomes through this trait and never
//! depends on any display state coming back.

use crate::recorder::{CaptureRecord, RecorderError};
use crate::scale::ScaleError;
use crate::upload::UploadOutcome;
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

/// Sink for operator-facing notifications.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    /// A live weight reading for display.
    async fn weight_reading(&self, grams: f64);

    /// The live reading could not be taken; the display shows an error and
    /// the loop keeps running.
    async fn weight_unavailable(&self, error: &ScaleError);

    /// The scale was zeroed; the post-zero raw mean is shown for a sanity
    /// check before the reference mass goes on.
    async fn calibration_zeroed(&self, post_zero_mean: f64);

    /// A new calibration ratio was persisted and is active.
    async fn calibration_saved(&self, ratio: f64);

    /// A capture was saved locally.
    async fn capture_saved(&self, record: &CaptureRecord);

    /// The local save failed; the measurement must be redone.
    async fn capture_failed(&self, error: &RecorderError);

    /// The background upload finished. Advisory only.
    async fn upload_finished(&self, record_id: Uuid, outcome: &UploadOutcome);
}

/// Notifier that logs through `tracing`, used when the service runs headless.
pub struct LogNotifier;

#[async_trait]
impl OperatorNotifier for LogNotifier {
    async fn weight_reading(&self, grams: f64) {
        info!(grams = format!("{grams:.1}"), "weight reading");
    }

    async fn weight_unavailable(&self, error: &ScaleError) {
        warn!(error = %error, "weight reading unavailable");
    }

    async fn calibration_zeroed(&self, post_zero_mean: f64) {
        info!(post_zero_mean, "scale zeroed");
    }

    async fn calibration_saved(&self, ratio: f64) {
        info!(ratio, "calibration saved");
    }

    async fn capture_saved(&self, record: &CaptureRecord) {
        info!(
            record_id = %record.record_id,
            label = %record.label,
            weight_grams = record.weight_grams,
            image_path = %record.image_path.display(),
            "measurement saved"
        );
    }

    async fn capture_failed(&self, error: &RecorderError) {
        warn!(error = %error, "measurement could not be saved");
    }

    async fn upload_finished(&self, record_id: Uuid, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Accepted { remote_id } => {
                info!(record_id = %record_id, remote_id = ?remote_id, "upload succeeded");
            }
            UploadOutcome::Failed(error) => {
                warn!(record_id = %record_id, error = %error, "upload failed, local record kept");
            }
        }
    }
}
