//! Landmark detector seam.
//!
//! The face-mesh model is an external collaborator: anything that turns a
//! frame into zero or one [`LandmarkSet`] implements [`LandmarkSource`].
//! [`ReplayLandmarkSource`] plays back a recorded session and is what the
//! daemon runs with when no live model is wired in.

use crate::clock::Timestamp;
use crate::frame::Frame;
use crate::types::{LandmarkPoint, LandmarkSet};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("landmark model not found: {0}")]
    ModelNotFound(String),
    #[error("invalid landmark recording: {0}")]
    InvalidRecording(String),
    #[error("timestamp {current} is not after previous {previous}")]
    NonMonotonicTimestamp {
        previous: Timestamp,
        current: Timestamp,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Produces facial landmarks for a frame.
///
/// Callers must pass strictly increasing timestamps over the lifetime of
/// the source and must not issue a second call while one is pending.
pub trait LandmarkSource: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        timestamp: Timestamp,
    ) -> impl Future<Output = Result<Option<LandmarkSet>, DetectorError>> + Send;
}

/// On-disk recording: one entry per frame, `null` where no face was found.
#[derive(Deserialize)]
struct Recording {
    frames: Vec<Option<Vec<[f32; 3]>>>,
}

/// Replays recorded landmark frames in order, wrapping at the end.
pub struct ReplayLandmarkSource {
    frames: Vec<Option<LandmarkSet>>,
    cursor: usize,
    last_timestamp: Option<Timestamp>,
}

impl ReplayLandmarkSource {
    /// Load a JSON recording of the form `{"frames": [[[x, y, z], ...], null, ...]}`.
    pub fn load(path: &str) -> Result<Self, DetectorError> {
        if !Path::new(path).exists() {
            return Err(DetectorError::ModelNotFound(path.to_string()));
        }

        let raw = std::fs::read(path)
            .map_err(|e| DetectorError::InvalidRecording(format!("{path}: {e}")))?;
        let recording: Recording = serde_json::from_slice(&raw)
            .map_err(|e| DetectorError::InvalidRecording(format!("{path}: {e}")))?;

        if recording.frames.is_empty() {
            return Err(DetectorError::InvalidRecording(format!(
                "{path}: recording has no frames"
            )));
        }

        let frames: Vec<Option<LandmarkSet>> = recording
            .frames
            .into_iter()
            .map(|frame| frame.map(|points| points.into_iter().map(LandmarkPoint::from).collect()))
            .collect();

        tracing::info!(
            path,
            frames = frames.len(),
            with_face = frames.iter().filter(|f| f.is_some()).count(),
            "loaded landmark recording"
        );

        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<Option<LandmarkSet>>) -> Self {
        Self {
            frames,
            cursor: 0,
            last_timestamp: None,
        }
    }

    fn advance(&mut self, timestamp: Timestamp) -> Result<Option<LandmarkSet>, DetectorError> {
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(DetectorError::NonMonotonicTimestamp {
                    previous,
                    current: timestamp,
                });
            }
        }
        self.last_timestamp = Some(timestamp);

        if self.frames.is_empty() {
            return Ok(None);
        }
        let result = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(result)
    }
}

impl LandmarkSource for ReplayLandmarkSource {
    async fn detect(
        &mut self,
        _frame: &Frame,
        timestamp: Timestamp,
    ) -> Result<Option<LandmarkSet>, DetectorError> {
        self.advance(timestamp)
    }
}
