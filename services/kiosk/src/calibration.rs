//! Calibration persistence and the operator calibration workflow.
//!
//! [`CalibrationStore`] keeps the single scale ratio on disk; a missing or
//! unreadable file simply means the scale is uncalibrated. [`CalibrationSession`]
//! walks the operator through zeroing, placing a known reference mass, and
//! persisting the computed ratio.

use crate::notify::OperatorNotifier;
use crate::scale::{ScaleError, ScaleReader};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during a calibration run.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Scale(#[from] ScaleError),

    #[error("reference mass must be a positive number of grams, got {0}")]
    InvalidReferenceMass(f64),

    #[error("raw mean {raw_mean} over the reference mass cannot produce a positive ratio")]
    ImplausibleReading { raw_mean: f64 },

    #[error("'{action}' is not valid while calibration is {state}")]
    OutOfOrder {
        action: &'static str,
        state: &'static str,
    },

    #[error("failed to persist calibration: {0}")]
    Persist(#[source] std::io::Error),
}

/// On-disk shape of the calibration file.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    ratio: f64,
}

/// Persists the scale ratio as a small JSON file.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted ratio.
    ///
    /// A missing file, unreadable content, or a non-positive stored value all
    /// mean "uncalibrated" and yield `None`; corruption is logged, never
    /// raised.
    pub fn load(&self) -> Option<f64> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "calibration file unreadable");
                return None;
            }
        };

        let parsed: CalibrationFile = match serde_json::from_slice(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "calibration file corrupt");
                return None;
            }
        };

        if parsed.ratio.is_finite() && parsed.ratio > 0.0 {
            debug!(ratio = parsed.ratio, "calibration loaded");
            Some(parsed.ratio)
        } else {
            warn!(ratio = parsed.ratio, "stored calibration ratio is not positive");
            None
        }
    }

    /// Atomically overwrite the persisted ratio.
    ///
    /// The value is written to a temp file in the target directory and
    /// renamed over the destination, so a concurrent load never observes a
    /// torn file.
    pub fn save(&self, ratio: f64) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => std::path::Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer(&mut tmp, &CalibrationFile { ratio })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!(path = %self.path.display(), ratio, "calibration persisted");
        Ok(())
    }
}

/// Where a calibration run currently stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationState {
    Idle,
    Zeroed { post_zero_mean: f64 },
    AwaitingReferenceWeight,
    RatioComputed { ratio: f64 },
}

impl CalibrationState {
    fn name(&self) -> &'static str {
        match self {
            CalibrationState::Idle => "idle",
            CalibrationState::Zeroed { .. } => "zeroed",
            CalibrationState::AwaitingReferenceWeight => "awaiting reference weight",
            CalibrationState::RatioComputed { .. } => "ratio computed",
        }
    }
}

/// Operator calibration workflow over one scale.
///
/// Steps: zero the empty scale, confirm the reference mass is placed, submit
/// its value to compute the ratio, persist. Abandoning at any point returns
/// to idle without touching the store.
pub struct CalibrationSession {
    reader: Arc<ScaleReader>,
    store: CalibrationStore,
    notifier: Arc<dyn OperatorNotifier>,
    state: CalibrationState,
}

impl CalibrationSession {
    pub fn new(
        reader: Arc<ScaleReader>,
        store: CalibrationStore,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            reader,
            store,
            notifier,
            state: CalibrationState::Idle,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// Zero the empty scale and report the post-zero raw mean for a sanity
    /// check. Valid from idle, or as a retry while already zeroed.
    pub async fn zero(&mut self) -> Result<f64, CalibrationError> {
        match self.state {
            CalibrationState::Idle | CalibrationState::Zeroed { .. } => {}
            _ => {
                return Err(CalibrationError::OutOfOrder {
                    action: "zero",
                    state: self.state.name(),
                })
            }
        }

        self.reader.zero().await?;
        let post_zero_mean = self.reader.read_calibration_mean().await?;
        self.state = CalibrationState::Zeroed { post_zero_mean };
        self.notifier.calibration_zeroed(post_zero_mean).await;
        Ok(post_zero_mean)
    }

    /// The operator confirmed the reference mass is now on the scale.
    pub fn confirm_reference_placed(&mut self) -> Result<(), CalibrationError> {
        match self.state {
            CalibrationState::Zeroed { .. } => {
                self.state = CalibrationState::AwaitingReferenceWeight;
                Ok(())
            }
            _ => Err(CalibrationError::OutOfOrder {
                action: "confirm reference placed",
                state: self.state.name(),
            }),
        }
    }

    /// Compute the ratio from the reference mass currently on the scale.
    ///
    /// A non-positive or non-finite mass is rejected and the session stays in
    /// this step so the operator can correct the input.
    pub async fn submit_reference_mass(&mut self, grams: f64) -> Result<f64, CalibrationError> {
        if self.state != CalibrationState::AwaitingReferenceWeight {
            return Err(CalibrationError::OutOfOrder {
                action: "submit reference mass",
                state: self.state.name(),
            });
        }

        if !grams.is_finite() || grams <= 0.0 {
            return Err(CalibrationError::InvalidReferenceMass(grams));
        }

        let raw_mean = self.reader.read_calibration_mean().await?;
        let ratio = raw_mean / grams;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(CalibrationError::ImplausibleReading { raw_mean });
        }

        debug!(raw_mean, grams, ratio, "calibration ratio computed");
        self.state = CalibrationState::RatioComputed { ratio };
        Ok(ratio)
    }

    /// Persist the computed ratio and make it active, completing the run.
    pub async fn persist(&mut self) -> Result<f64, CalibrationError> {
        let ratio = match self.state {
            CalibrationState::RatioComputed { ratio } => ratio,
            _ => {
                return Err(CalibrationError::OutOfOrder {
                    action: "persist",
                    state: self.state.name(),
                })
            }
        };

        self.store.save(ratio).map_err(CalibrationError::Persist)?;
        self.reader.set_ratio(ratio);
        self.state = CalibrationState::Idle;
        self.notifier.calibration_saved(ratio).await;
        Ok(ratio)
    }

    /// Abandon the run; no partial state survives and the store is untouched.
    pub fn abandon(&mut self) {
        if self.state != CalibrationState::Idle {
            debug!(state = self.state.name(), "calibration abandoned");
        }
        self.state = CalibrationState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScaleConfig;
    use crate::notify::LogNotifier;
    use crate::scale::{LoadCell, ScaleReader};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ConstantCell(i32);

    #[async_trait]
    impl LoadCell for ConstantCell {
        async fn read_raw(&mut self) -> Result<i32, ScaleError> {
            Ok(self.0)
        }
    }

    fn test_reader(raw: i32) -> Arc<ScaleReader> {
        let config = ScaleConfig {
            driver: "sim".to_string(),
            calibration_samples: 8,
            display_samples: 4,
            poll_interval_ms: 1000,
        };
        Arc::new(ScaleReader::new(ConstantCell(raw), &config))
    }

    fn test_session(raw: i32, dir: &TempDir) -> (CalibrationSession, CalibrationStore) {
        let store = CalibrationStore::new(dir.path().join("scale_calibration.json"));
        let session = CalibrationSession::new(
            test_reader(raw),
            store.clone(),
            Arc::new(LogNotifier),
        );
        (session, store)
    }

    #[test]
    fn test_store_load_missing_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_store_load_corrupt_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scale_calibration.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert_eq!(CalibrationStore::new(&path).load(), None);
    }

    #[test]
    fn test_store_load_non_positive_ratio_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scale_calibration.json");
        std::fs::write(&path, br#"{"ratio": 0.0}"#).unwrap();
        assert_eq!(CalibrationStore::new(&path).load(), None);
    }

    #[test]
    fn test_store_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("scale_calibration.json"));

        let ratio = 2500.0 / 3.7;
        store.save(ratio).unwrap();
        assert_eq!(store.load(), Some(ratio));

        // Recalibration overwrites, never merges.
        store.save(512.25).unwrap();
        assert_eq!(store.load(), Some(512.25));
    }

    #[tokio::test]
    async fn test_unchanged_reading_over_reference_is_implausible() {
        let dir = TempDir::new().unwrap();
        let (mut session, store) = test_session(2500, &dir);

        let post_zero = session.zero().await.unwrap();
        assert_eq!(post_zero, 0.0);
        session.confirm_reference_placed().unwrap();

        // Nothing was actually placed on the scale: the tared mean is zero,
        // which cannot produce a positive ratio.
        let err = session.submit_reference_mass(500.0).await.unwrap_err();
        assert!(matches!(err, CalibrationError::ImplausibleReading { .. }));
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn test_calibration_run_with_loaded_scale() {
        struct SteppingCell {
            reads: u32,
            empty: i32,
            loaded: i32,
            step_after: u32,
        }

        #[async_trait]
        impl LoadCell for SteppingCell {
            async fn read_raw(&mut self) -> Result<i32, ScaleError> {
                self.reads += 1;
                if self.reads > self.step_after {
                    Ok(self.loaded)
                } else {
                    Ok(self.empty)
                }
            }
        }

        let config = ScaleConfig {
            driver: "sim".to_string(),
            calibration_samples: 8,
            display_samples: 4,
            poll_interval_ms: 1000,
        };
        // Zero and the post-zero sanity batch see the empty scale; the
        // reference batch sees it loaded.
        let cell = SteppingCell {
            reads: 0,
            empty: 100,
            loaded: 2600,
            step_after: 16,
        };
        let reader = Arc::new(ScaleReader::new(cell, &config));
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("scale_calibration.json"));
        let mut session =
            CalibrationSession::new(reader.clone(), store.clone(), Arc::new(LogNotifier));

        session.zero().await.unwrap();
        session.confirm_reference_placed().unwrap();
        let ratio = session.submit_reference_mass(5.0).await.unwrap();
        assert_eq!(ratio, 500.0); // (2600 - 100) / 5.0
        assert!(matches!(
            session.state(),
            CalibrationState::RatioComputed { .. }
        ));

        let persisted = session.persist().await.unwrap();
        assert_eq!(persisted, 500.0);
        assert_eq!(store.load(), Some(500.0));
        assert_eq!(reader.active_ratio(), Some(500.0));
        assert_eq!(session.state(), CalibrationState::Idle);

        // The new ratio is immediately active for measurements.
        let grams = reader.read_weight().await.unwrap();
        assert_eq!(grams, 5.0);
    }

    #[tokio::test]
    async fn test_invalid_reference_mass_keeps_state() {
        let dir = TempDir::new().unwrap();
        let (mut session, store) = test_session(2500, &dir);

        session.zero().await.unwrap();
        session.confirm_reference_placed().unwrap();

        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = session.submit_reference_mass(bad).await.unwrap_err();
            assert!(matches!(err, CalibrationError::InvalidReferenceMass(_)));
            assert_eq!(session.state(), CalibrationState::AwaitingReferenceWeight);
        }
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn test_abandon_never_writes_store() {
        let dir = TempDir::new().unwrap();
        let (mut session, store) = test_session(2500, &dir);

        session.zero().await.unwrap();
        session.confirm_reference_placed().unwrap();
        session.abandon();
        assert_eq!(session.state(), CalibrationState::Idle);
        assert_eq!(store.load(), None);
    }

    #[tokio::test]
    async fn test_out_of_order_steps_are_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut session, _store) = test_session(2500, &dir);

        assert!(matches!(
            session.submit_reference_mass(500.0).await,
            Err(CalibrationError::OutOfOrder { .. })
        ));
        assert!(matches!(
            session.persist().await,
            Err(CalibrationError::OutOfOrder { .. })
        ));
        assert!(matches!(
            session.confirm_reference_placed(),
            Err(CalibrationError::OutOfOrder { .. })
        ));
    }
}
