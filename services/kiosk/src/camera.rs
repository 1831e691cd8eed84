//! Still-image capture seam.
//!
//! The concrete camera pipeline (V4L2, GStreamer, ...) lives outside this
//! crate; the core only needs encoded still-image bytes at the moment the
//! operator confirms a measurement.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while capturing a still image.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    #[error("image capture failed: {0}")]
    CaptureFailed(String),
}

/// An encoded still image.
#[derive(Debug, Clone)]
pub struct StillImage {
    /// Encoded image bytes
    pub data: Bytes,

    /// Image format (jpeg, png, ...)
    pub format: String,
}

impl StillImage {
    /// File extension for the image format.
    pub fn extension(&self) -> &str {
        match self.format.to_lowercase().as_str() {
            "jpeg" | "jpg" => "jpg",
            "png" => "png",
            "webp" => "webp",
            _ => "bin",
        }
    }
}

/// Interface to a camera able to produce one encoded still per request.
#[async_trait]
pub trait StillCamera: Send + Sync {
    /// Capture a single still image.
    async fn capture_still(&self) -> Result<StillImage, CameraError>;
}

/// Serves a fixed frame. Stands in for the real camera pipeline during
/// bring-up and in tests.
pub struct StaticCamera {
    image: StillImage,
}

impl StaticCamera {
    pub fn new(data: Bytes, format: impl Into<String>) -> Self {
        Self {
            image: StillImage {
                data,
                format: format.into(),
            },
        }
    }
}

#[async_trait]
impl StillCamera for StaticCamera {
    async fn capture_still(&self) -> Result<StillImage, CameraError> {
        Ok(self.image.clone())
    }
}
