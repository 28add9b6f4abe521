use crate::types::FeatureVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Comparing vectors of different lengths or with zero magnitude is a
/// contract violation, not a user-facing outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("degenerate vector: zero magnitude")]
    DegenerateVector,
}

/// Cosine similarity in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimilarityScore(f32);

impl SimilarityScore {
    pub fn value(self) -> f32 {
        self.0
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Strategy for scoring a live vector against the enrolled template.
pub trait Scorer {
    fn score(&self, a: &FeatureVector, b: &FeatureVector) -> Result<SimilarityScore, ScoreError>;
}

/// Cosine similarity, accumulated in f64 and clamped to absorb rounding.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineScorer;

impl Scorer for CosineScorer {
    fn score(&self, a: &FeatureVector, b: &FeatureVector) -> Result<SimilarityScore, ScoreError> {
        if a.dim() != b.dim() {
            return Err(ScoreError::DimensionMismatch {
                left: a.dim(),
                right: b.dim(),
            });
        }

        let dot: f64 = a
            .values()
            .iter()
            .zip(b.values())
            .map(|(&x, &y)| f64::from(x) * f64::from(y))
            .sum();

        let denom = a.magnitude() * b.magnitude();
        if denom == 0.0 || !denom.is_finite() {
            return Err(ScoreError::DegenerateVector);
        }

        Ok(SimilarityScore((dot / denom).clamp(-1.0, 1.0) as f32))
    }
}
