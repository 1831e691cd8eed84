//! Live measurement session.
//!
//! Entering a session re-reads the persisted calibration (picking up
//! out-of-band changes), zeros the scale so tare drift does not bias the
//! run, and then polls the weight on a fixed interval for display until
//! cancelled. A failed sample is reported and the loop keeps going.

use crate::calibration::CalibrationStore;
use crate::notify::OperatorNotifier;
use crate::scale::{ScaleError, ScaleReader};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A running measurement session over one scale.
pub struct MeasurementSession {
    reader: Arc<ScaleReader>,
    notifier: Arc<dyn OperatorNotifier>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl MeasurementSession {
    /// Begin a session: reload the ratio from the store, activate it, and
    /// zero the scale. Fails `Uncalibrated` when no valid ratio is persisted.
    pub async fn begin(
        reader: Arc<ScaleReader>,
        store: &CalibrationStore,
        notifier: Arc<dyn OperatorNotifier>,
        poll_interval: Duration,
    ) -> Result<Self, ScaleError> {
        let ratio = store.load().ok_or(ScaleError::Uncalibrated)?;
        reader.set_ratio(ratio);
        reader.zero().await?;
        debug!(ratio, "measurement session started");

        Ok(Self {
            reader,
            notifier,
            poll_interval,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the polling loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared handle to the scale, for taking the reading the operator saves.
    pub fn reader(&self) -> Arc<ScaleReader> {
        self.reader.clone()
    }

    /// Run the display polling loop until cancelled.
    ///
    /// Each tick pushes one reading (or the read error) to the notifier;
    /// no single failure ends the loop, and nothing here waits on network.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.reader.read_weight().await {
                        Ok(grams) => self.notifier.weight_reading(grams).await,
                        Err(e) => {
                            warn!(error = %e, "live weight reading failed");
                            metrics::counter!("kiosk.samples.failed").increment(1);
                            self.notifier.weight_unavailable(&e).await;
                        }
                    }
                }
            }
        }

        info!("measurement session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleConfig;
    use crate::recorder::{CaptureRecord, RecorderError};
    use crate::scale::LoadCell;
    use crate::upload::UploadOutcome;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct ConstantCell(i32);

    #[async_trait]
    impl LoadCell for ConstantCell {
        async fn read_raw(&mut self) -> Result<i32, ScaleError> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        readings: Mutex<Vec<f64>>,
        errors: Mutex<usize>,
    }

    #[async_trait]
    impl OperatorNotifier for RecordingNotifier {
        async fn weight_reading(&self, grams: f64) {
            self.readings.lock().push(grams);
        }
        async fn weight_unavailable(&self, _error: &ScaleError) {
            *self.errors.lock() += 1;
        }
        async fn calibration_zeroed(&self, _post_zero_mean: f64) {}
        async fn calibration_saved(&self, _ratio: f64) {}
        async fn capture_saved(&self, _record: &CaptureRecord) {}
        async fn capture_failed(&self, _error: &RecorderError) {}
        async fn upload_finished(&self, _record_id: Uuid, _outcome: &UploadOutcome) {}
    }

    fn test_reader(raw: i32) -> Arc<ScaleReader> {
        let config = ScaleConfig {
            driver: "sim".to_string(),
            calibration_samples: 4,
            display_samples: 4,
            poll_interval_ms: 1000,
        };
        Arc::new(ScaleReader::new(ConstantCell(raw), &config))
    }

    #[tokio::test]
    async fn test_begin_without_calibration_fails() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("scale_calibration.json"));

        let result = MeasurementSession::begin(
            test_reader(2500),
            &store,
            Arc::new(RecordingNotifier::default()),
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(result, Err(ScaleError::Uncalibrated)));
    }

    #[tokio::test]
    async fn test_begin_reloads_ratio_and_zeros() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("scale_calibration.json"));
        store.save(500.0).unwrap();

        let reader = test_reader(2500);
        let session = MeasurementSession::begin(
            reader.clone(),
            &store,
            Arc::new(RecordingNotifier::default()),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert_eq!(reader.active_ratio(), Some(500.0));
        // The scale was zeroed at session start, so the constant cell now
        // reads as an empty scale.
        assert_eq!(session.reader().read_weight().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_reports_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("scale_calibration.json"));
        store.save(500.0).unwrap();

        let notifier = Arc::new(RecordingNotifier::default());
        let session = MeasurementSession::begin(
            test_reader(2500),
            &store,
            notifier.clone(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        let cancel = session.cancel_token();
        let handle = tokio::spawn(session.run());

        // Paused clock: sleeping advances virtual time and fires ticks.
        while notifier.readings.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        cancel.cancel();
        handle.await.unwrap();

        let readings = notifier.readings.lock();
        assert!(readings.len() >= 3);
        assert!(readings.iter().all(|g| *g == 0.0));
        assert_eq!(*notifier.errors.lock(), 0);
    }
}
