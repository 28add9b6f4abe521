use crate::similarity::SimilarityScore;
use serde::{Deserialize, Serialize};

/// Default cosine similarity cutoff for raw landmark vectors.
pub const DEFAULT_THRESHOLD: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
}

impl Verdict {
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }
}

/// Accept only when the score is strictly above the threshold.
pub fn decide(score: SimilarityScore, threshold: f32) -> Verdict {
    if score.value() > threshold {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{CosineScorer, Scorer};
    use crate::types::FeatureVector;

    fn s(value: f32) -> SimilarityScore {
        let a = FeatureVector::new(vec![1.0, 0.0]);
        let b = FeatureVector::new(vec![value, (1.0 - value * value).max(0.0).sqrt()]);
        CosineScorer.score(&a, &b).unwrap()
    }

    #[test]
    fn test_above_threshold_accepts() {
        assert_eq!(decide(s(0.95), DEFAULT_THRESHOLD), Verdict::Accept);
        assert_eq!(decide(s(1.0), DEFAULT_THRESHOLD), Verdict::Accept);
    }

    #[test]
    fn test_below_threshold_rejects() {
        assert_eq!(decide(s(0.5), DEFAULT_THRESHOLD), Verdict::Reject);
        assert_eq!(decide(s(-1.0), DEFAULT_THRESHOLD), Verdict::Reject);
    }

    #[test]
    fn test_equal_to_threshold_rejects() {
        let score = s(1.0);
        assert_eq!(decide(score, score.value()), Verdict::Reject);
    }

    #[test]
    fn test_default_threshold_is_exclusive() {
        let near = s(0.9);
        assert!((near.value() - DEFAULT_THRESHOLD).abs() < 1e-6, "got {near}");
        assert_eq!(decide(near, near.value()), Verdict::Reject);

        let exact: SimilarityScore = serde_json::from_str("0.9").unwrap();
        assert_eq!(exact.value(), DEFAULT_THRESHOLD);
        assert_eq!(decide(exact, DEFAULT_THRESHOLD), Verdict::Reject);

        assert_eq!(decide(s(0.9001), DEFAULT_THRESHOLD), Verdict::Accept);
        assert_eq!(decide(s(0.8999), DEFAULT_THRESHOLD), Verdict::Reject);
    }

    #[test]
    fn test_verdict_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::Accept).unwrap(), "\"accept\"");
        assert!(!Verdict::Reject.is_accept());
    }
}
