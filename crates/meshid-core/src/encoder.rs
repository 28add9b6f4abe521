//! Landmark set → feature vector.
//!
//! Raw coordinates are used as-is: no translation or scale correction, so
//! the same face at a different distance from the camera yields a
//! different vector.

use crate::types::{FeatureVector, LandmarkSet};
use thiserror::Error;

/// Landmark count of the face-mesh detector output (468 mesh + 10 iris).
pub const FACE_MESH_LANDMARKS: usize = 478;

const COORDS_PER_POINT: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("landmark set has {actual} points, detector contract is {expected}")]
    Cardinality { expected: usize, actual: usize },
    #[error("landmark {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

/// Flattens landmark sets of a fixed cardinality.
#[derive(Debug, Clone, Copy)]
pub struct FeatureEncoder {
    landmark_count: usize,
}

impl Default for FeatureEncoder {
    fn default() -> Self {
        Self::new(FACE_MESH_LANDMARKS)
    }
}

impl FeatureEncoder {
    /// # Panics
    /// Panics if `landmark_count` is zero.
    pub fn new(landmark_count: usize) -> Self {
        assert!(landmark_count > 0, "landmark count must be non-zero");
        Self { landmark_count }
    }

    pub fn landmark_count(&self) -> usize {
        self.landmark_count
    }

    /// Length of every vector this encoder produces.
    pub fn dimension(&self) -> usize {
        self.landmark_count * COORDS_PER_POINT
    }

    /// Point `i` lands at indices `3i`, `3i + 1`, `3i + 2`.
    pub fn encode(&self, landmarks: &LandmarkSet) -> Result<FeatureVector, EncodeError> {
        if landmarks.len() != self.landmark_count {
            return Err(EncodeError::Cardinality {
                expected: self.landmark_count,
                actual: landmarks.len(),
            });
        }

        let mut values = Vec::with_capacity(self.dimension());
        for (index, point) in landmarks.points().iter().enumerate() {
            if !point.is_finite() {
                return Err(EncodeError::NonFinite { index });
            }
            values.extend_from_slice(&[point.x, point.y, point.z]);
        }

        Ok(FeatureVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LandmarkPoint;

    fn set(points: &[[f32; 3]]) -> LandmarkSet {
        points.iter().copied().map(LandmarkPoint::from).collect()
    }

    #[test]
    fn test_encode_flattens_in_point_order() {
        let landmarks = set(&[[0.1, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9]]);
        let v = FeatureEncoder::new(3).encode(&landmarks).unwrap();
        assert_eq!(v.dim(), 9);
        for (i, p) in landmarks.points().iter().enumerate() {
            assert_eq!(v.values()[3 * i], p.x);
            assert_eq!(v.values()[3 * i + 1], p.y);
            assert_eq!(v.values()[3 * i + 2], p.z);
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let landmarks = set(&[[0.3, -0.1, 0.02], [0.5, 0.5, -0.04]]);
        let encoder = FeatureEncoder::new(2);
        assert_eq!(
            encoder.encode(&landmarks).unwrap(),
            encoder.encode(&landmarks).unwrap()
        );
    }

    #[test]
    fn test_encode_single_origin_point() {
        let v = FeatureEncoder::new(1).encode(&set(&[[0.0, 0.0, 0.0]])).unwrap();
        assert_eq!(v.values(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_encode_rejects_wrong_cardinality() {
        let err = FeatureEncoder::new(3)
            .encode(&set(&[[0.1, 0.2, 0.3]]))
            .unwrap_err();
        assert_eq!(err, EncodeError::Cardinality { expected: 3, actual: 1 });
    }

    #[test]
    fn test_encode_rejects_empty_set() {
        let err = FeatureEncoder::default().encode(&LandmarkSet::default()).unwrap_err();
        assert_eq!(
            err,
            EncodeError::Cardinality { expected: FACE_MESH_LANDMARKS, actual: 0 }
        );
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let err = FeatureEncoder::new(2)
            .encode(&set(&[[0.1, 0.2, 0.3], [0.1, f32::NAN, 0.3]]))
            .unwrap_err();
        assert_eq!(err, EncodeError::NonFinite { index: 1 });
    }

    #[test]
    fn test_default_dimension() {
        assert_eq!(FeatureEncoder::default().dimension(), 3 * FACE_MESH_LANDMARKS);
    }
}
