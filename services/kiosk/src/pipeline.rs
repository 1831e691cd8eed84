//! Capture pipeline: local durability first, upload as a side path.
//!
//! The local record is authoritative. The upload runs as a one-shot
//! background task bounded by the client timeout; whatever it returns is
//! reported to the operator and never rolls back the local record.

use crate::camera::StillImage;
use crate::notify::OperatorNotifier;
use crate::recorder::{CaptureRecord, CaptureRecorder, RecorderError};
use crate::upload::{UploadClient, UploadOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Composes the recorder and the upload client for one capture flow.
pub struct CapturePipeline {
    recorder: CaptureRecorder,
    uploader: Arc<UploadClient>,
    notifier: Arc<dyn OperatorNotifier>,
}

impl CapturePipeline {
    pub fn new(
        recorder: CaptureRecorder,
        uploader: Arc<UploadClient>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            recorder,
            uploader,
            notifier,
        }
    }

    /// Capture one measurement.
    ///
    /// The local record must complete before this returns; only then is the
    /// upload spawned. A local failure skips the upload entirely. The
    /// returned handle resolves to the upload outcome, which is also pushed
    /// to the operator notifier.
    #[instrument(skip(self, image), fields(label = %label))]
    pub async fn capture(
        &self,
        label: &str,
        weight_grams: f64,
        image: StillImage,
    ) -> Result<(CaptureRecord, JoinHandle<UploadOutcome>), RecorderError> {
        let record = match self.recorder.record(label, weight_grams, &image).await {
            Ok(record) => record,
            Err(e) => {
                self.notifier.capture_failed(&e).await;
                return Err(e);
            }
        };

        self.notifier.capture_saved(&record).await;

        let uploader = self.uploader.clone();
        let notifier = self.notifier.clone();
        let upload_record = record.clone();
        let handle = tokio::spawn(async move {
            let outcome = uploader.upload(&upload_record, &image.data).await;
            notifier
                .upload_finished(upload_record.record_id, &outcome)
                .await;
            outcome
        });

        Ok((record, handle))
    }
}
