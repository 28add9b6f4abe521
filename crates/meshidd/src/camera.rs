//! Video capture seam and the still-image reference camera.

use meshid_core::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera not started")]
    NotStarted,
}

/// A video stream the session can acquire, read and release.
pub trait Camera: Send {
    fn start(&mut self) -> Result<(), CameraError>;
    fn capture_frame(&mut self) -> Result<Frame, CameraError>;
    fn stop(&mut self);
}

/// Serves one decoded image as an endless stream of grayscale frames.
pub struct StillImageCamera {
    path: PathBuf,
    image: Option<(Vec<u8>, u32, u32)>,
    sequence: u32,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image: None,
            sequence: 0,
        }
    }
}

impl Camera for StillImageCamera {
    fn start(&mut self) -> Result<(), CameraError> {
        if !Path::new(&self.path).exists() {
            return Err(CameraError::DeviceNotFound(self.path.display().to_string()));
        }

        let decoded = image::open(&self.path).map_err(|e| {
            CameraError::CaptureFailed(format!("{}: {e}", self.path.display()))
        })?;
        let gray = decoded.to_luma8();
        let (width, height) = gray.dimensions();

        tracing::info!(
            path = %self.path.display(),
            width,
            height,
            "opened still-image camera"
        );

        self.image = Some((gray.into_raw(), width, height));
        self.sequence = 0;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (data, width, height) = self.image.as_ref().ok_or(CameraError::NotStarted)?;
        let frame = Frame {
            data: data.clone(),
            width: *width,
            height: *height,
            timestamp: std::time::Instant::now(),
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn stop(&mut self) {
        if self.image.take().is_some() {
            tracing::debug!(path = %self.path.display(), "still-image camera released");
        }
    }
}
