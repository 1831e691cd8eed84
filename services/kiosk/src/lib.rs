//! Weighing Kiosk Service
//!
//! Measurement capture and calibration core for an unattended produce
//! weighing kiosk. The service reads a load cell, lets the operator
//! calibrate it against a known reference mass, and on each confirmed
//! measurement stores a photo plus a structured record locally before
//! attempting a best-effort upload to the remote collection endpoint.
//!
//! ## Architecture
//!
//! ```text
//! Load cell                  Local disk                Remote endpoint
//! ┌──────────────┐          ┌────────────────┐        ┌──────────────┐
//! │ LoadCell     │          │ captures/*.jpg │        │ HTTPS POST   │
//! │ (device)     │          │ measurements   │   ┌───▶│ JSON payload │
//! └──────────────┘          │ .jsonl         │   │    └──────────────┘
//!        │                  └────────────────┘   │
//!        ▼                          ▲            │
//! ┌──────────────┐                  │            │
//! │ Scale        │          ┌──────────────┐     │
//! │ Reader       │─────────▶│ Capture      │─────┘
//! └──────────────┘          │ Pipeline     │  upload is a side path;
//!        │                  └──────────────┘  the local record rules
//!        ▼                          ▲
//! ┌──────────────┐          ┌──────────────┐
//! │ Calibration  │          │ Still        │
//! │ Session/Store│          │ Camera       │
//! └──────────────┘          └──────────────┘
//! ```
//!
//! Display concerns (menus, preview, rendering) stay outside; the core only
//! pushes one-way notifications through [`notify::OperatorNotifier`].

pub mod calibration;
pub mod camera;
pub mod config;
pub mod notify;
pub mod pipeline;
pub mod recorder;
pub mod scale;
pub mod session;
pub mod upload;

pub use calibration::{CalibrationError, CalibrationSession, CalibrationState, CalibrationStore};
pub use camera::{CameraError, StaticCamera, StillCamera, StillImage};
pub use config::KioskConfig;
pub use notify::{LogNotifier, OperatorNotifier};
pub use pipeline::CapturePipeline;
pub use recorder::{CaptureRecord, CaptureRecorder, RecorderError};
pub use scale::{LoadCell, ScaleError, ScaleReader, SimulatedLoadCell};
pub use session::MeasurementSession;
pub use upload::{UploadClient, UploadError, UploadOutcome};
