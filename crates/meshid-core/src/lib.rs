//! meshid-core — Landmark geometry to match decision.
//!
//! Flattens face-mesh landmark sets into feature vectors, scores them with
//! cosine similarity and thresholds the score into a verdict. The landmark
//! detector itself is an external collaborator behind [`LandmarkSource`].

pub mod clock;
pub mod decision;
pub mod detector;
pub mod encoder;
pub mod frame;
pub mod similarity;
pub mod types;

pub use clock::{MonotonicClock, Timestamp};
pub use decision::{decide, Verdict, DEFAULT_THRESHOLD};
pub use detector::{DetectorError, LandmarkSource, ReplayLandmarkSource};
pub use encoder::{EncodeError, FeatureEncoder, FACE_MESH_LANDMARKS};
pub use frame::Frame;
pub use similarity::{CosineScorer, ScoreError, Scorer, SimilarityScore};
pub use types::{FeatureVector, LandmarkPoint, LandmarkSet};
