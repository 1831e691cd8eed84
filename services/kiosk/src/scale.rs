//! Load-cell sampling and weight conversion.
//!
//! The raw sensor sits behind the [`LoadCell`] trait so the GPIO driver stays
//! outside this crate. [`ScaleReader`] owns the sampling protocol: tare
//! offset, batch averaging with per-sample failure tolerance, and the
//! raw-to-grams conversion gated on a positive calibration ratio.

use crate::config::ScaleConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Errors that can occur while reading the scale.
#[derive(Debug, Clone, Error)]
pub enum ScaleError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("scale is not calibrated")]
    Uncalibrated,
}

/// Interface to the raw load-cell device.
///
/// Implementations return one voltage-proportional conversion per call and
/// map device faults to [`ScaleError::SensorUnavailable`].
#[async_trait]
pub trait LoadCell: Send {
    /// Take a single raw reading from the device.
    async fn read_raw(&mut self) -> Result<i32, ScaleError>;
}

/// Reader for a single load cell.
///
/// Exactly one device is wrapped per reader; sessions share it through an
/// `Arc`. The active ratio is read on every conversion and written only by
/// the calibration flow.
pub struct ScaleReader {
    cell: Mutex<Box<dyn LoadCell>>,
    tare_offset: RwLock<f64>,
    ratio: RwLock<Option<f64>>,
    calibration_samples: usize,
    display_samples: usize,
}

impl ScaleReader {
    /// Create a new reader over the given device.
    pub fn new(cell: impl LoadCell + 'static, config: &ScaleConfig) -> Self {
        Self {
            cell: Mutex::new(Box::new(cell)),
            tare_offset: RwLock::new(0.0),
            ratio: RwLock::new(None),
            calibration_samples: config.calibration_samples,
            display_samples: config.display_samples,
        }
    }

    /// Mean of `n` raw samples with no offset correction.
    ///
    /// Failed samples are skipped; the mean is over the successes. Only a
    /// batch in which every sample fails is an error.
    async fn raw_batch_mean(&self, n: usize) -> Result<f64, ScaleError> {
        let mut cell = self.cell.lock().await;
        let mut sum = 0.0;
        let mut ok = 0usize;
        let mut last_err = None;

        for _ in 0..n {
            match cell.read_raw().await {
                Ok(sample) => {
                    trace!(sample, "raw sample");
                    sum += sample as f64;
                    ok += 1;
                }
                Err(e) => {
                    debug!(error = %e, "raw sample failed, skipping");
                    last_err = Some(e);
                }
            }
        }

        if ok == 0 {
            return Err(last_err
                .unwrap_or_else(|| ScaleError::SensorUnavailable("empty sample batch".into())));
        }

        if ok < n {
            warn!(requested = n, used = ok, "sample batch was partially unreadable");
        }

        Ok(sum / ok as f64)
    }

    /// Tare the scale: capture the current raw baseline as the zero offset.
    ///
    /// Subsequent raw means are corrected against this baseline.
    pub async fn zero(&self) -> Result<(), ScaleError> {
        let baseline = self.raw_batch_mean(self.calibration_samples).await?;
        *self.tare_offset.write() = baseline;
        debug!(baseline, "scale zeroed");
        Ok(())
    }

    /// Offset-corrected mean of `n` raw samples.
    pub async fn read_raw_mean(&self, n: usize) -> Result<f64, ScaleError> {
        let mean = self.raw_batch_mean(n).await?;
        Ok(mean - *self.tare_offset.read())
    }

    /// Offset-corrected mean over a calibration-grade batch.
    pub async fn read_calibration_mean(&self) -> Result<f64, ScaleError> {
        self.read_raw_mean(self.calibration_samples).await
    }

    /// Set the active ratio for subsequent [`read_weight`](Self::read_weight)
    /// calls. Non-positive or non-finite values clear the ratio instead.
    pub fn set_ratio(&self, ratio: f64) {
        if ratio.is_finite() && ratio > 0.0 {
            *self.ratio.write() = Some(ratio);
        } else {
            warn!(ratio, "ignoring non-positive calibration ratio");
            *self.ratio.write() = None;
        }
    }

    /// The currently active calibration ratio, if any.
    pub fn active_ratio(&self) -> Option<f64> {
        *self.ratio.read()
    }

    /// Read the current weight in grams using the active ratio.
    pub async fn read_weight(&self) -> Result<f64, ScaleError> {
        let ratio = match self.active_ratio() {
            Some(r) if r > 0.0 => r,
            _ => return Err(ScaleError::Uncalibrated),
        };

        let mean = self.read_raw_mean(self.display_samples).await?;
        Ok(mean / ratio)
    }
}

/// Deterministic stand-in for the hardware bridge, used during bring-up and
/// in tests. Produces readings around a fixed baseline with small synthetic
/// noise.
pub struct SimulatedLoadCell {
    baseline: i32,
    noise: i32,
    state: u64,
}

impl SimulatedLoadCell {
    pub fn new(baseline: i32, noise: i32) -> Self {
        Self {
            baseline,
            noise,
            state: 0x9e3779b97f4a7c15,
        }
    }

    fn next_noise(&mut self) -> i32 {
        // xorshift64, plenty for synthetic jitter
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        if self.noise == 0 {
            0
        } else {
            (self.state % (2 * self.noise as u64 + 1)) as i32 - self.noise
        }
    }
}

#[async_trait]
impl LoadCell for SimulatedLoadCell {
    async fn read_raw(&mut self) -> Result<i32, ScaleError> {
        let noise = self.next_noise();
        Ok(self.baseline + noise)
    }
}
