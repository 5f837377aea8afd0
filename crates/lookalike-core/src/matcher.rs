//! Nearest-neighbour matching of detected faces against known identities.
//!
//! A linear scan over the known set picks the closest embedding; the distance
//! is turned into a confidence by the metric itself, and the threshold decides
//! between the known identity and a generated `stranger_N` label.

use crate::types::{DetectedFace, Embedding, FaceMatches, KnownFace, MatchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix of labels given to faces that match no known identity.
pub const STRANGER_PREFIX: &str = "stranger_";

/// Whether `label` falls in the namespace of generated stranger labels.
/// Such labels cannot be enrolled.
pub fn is_reserved_label(label: &str) -> bool {
    label.starts_with(STRANGER_PREFIX)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: query has {expected} values, known face '{identity}' has {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        identity: String,
    },
    #[error("threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("unsupported distance metric: {0} (expected \"cosine\" or \"euclidean\")")]
    UnknownMetric(String),
}

/// Distance used to compare embeddings.
///
/// Each variant reports distances in its own native range and owns the
/// conversion from distance to confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in [0, 2].
    #[default]
    Cosine,
    /// `‖a - b‖`, in [0, ∞).
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - a.similarity(b),
            DistanceMetric::Euclidean => a.euclidean_distance(b),
        }
    }

    /// Map a distance to a confidence where 1.0 means identical.
    ///
    /// Cosine: `1 - d`. Euclidean: `1 / (1 + d)`, which stays in (0, 1] for
    /// any distance.
    pub fn confidence(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(MatchError::UnknownMetric(other.to_string())),
        }
    }
}

/// Closest known face for one query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// Position in the known-face slice.
    pub index: usize,
    pub identity: String,
    pub distance: f32,
    pub confidence: f32,
}

impl BestMatch {
    pub fn is_match(&self, threshold: f32) -> bool {
        self.confidence >= 1.0 - threshold
    }
}

/// Classifies detected faces against a known-face set.
#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    metric: DistanceMetric,
    threshold: f32,
}

impl FaceMatcher {
    /// `threshold` is the maximum accepted distance in confidence terms:
    /// a face matches when `confidence >= 1 - threshold`.
    pub fn new(metric: DistanceMetric, threshold: f32) -> Result<Self, MatchError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        Ok(Self { metric, threshold })
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Find the closest known face to `query`.
    ///
    /// Returns `Ok(None)` when `known` is empty. Ties keep the earliest entry.
    pub fn best_match(
        &self,
        query: &Embedding,
        known: &[KnownFace],
    ) -> Result<Option<BestMatch>, MatchError> {
        let mut best: Option<(usize, f32)> = None;

        for (i, face) in known.iter().enumerate() {
            if face.embedding.dimensions() != query.dimensions() {
                return Err(MatchError::DimensionMismatch {
                    expected: query.dimensions(),
                    actual: face.embedding.dimensions(),
                    identity: face.label.clone(),
                });
            }

            let distance = self.metric.distance(query, &face.embedding);
            let closer = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((i, distance));
            }
        }

        Ok(best.map(|(index, distance)| BestMatch {
            index,
            identity: known[index].label.clone(),
            distance,
            confidence: self.metric.confidence(distance),
        }))
    }

    /// Label every detected face of one image.
    ///
    /// With no known faces the result is empty: there is nothing to compare
    /// against, so no strangers are reported either.
    pub fn match_faces(
        &self,
        detected: &[DetectedFace],
        known: &[KnownFace],
    ) -> Result<FaceMatches, MatchError> {
        let mut matches = FaceMatches::new();
        if known.is_empty() {
            return Ok(matches);
        }

        let mut strangers = 0usize;
        for (i, face) in detected.iter().enumerate() {
            let Some(best) = self.best_match(&face.embedding, known)? else {
                continue;
            };

            if best.is_match(self.threshold) {
                let kept = matches.upsert_best(MatchResult {
                    name: best.identity.clone(),
                    confidence: best.confidence,
                    bounding_box: face.bounding_box,
                });
                tracing::debug!(
                    face = i,
                    identity = %best.identity,
                    confidence = best.confidence,
                    kept,
                    "face matched"
                );
            } else {
                let name = next_stranger_label(&mut strangers, known);
                tracing::debug!(
                    face = i,
                    label = %name,
                    closest = %best.identity,
                    confidence = best.confidence,
                    "best match below threshold"
                );
                matches.push(MatchResult {
                    name,
                    confidence: best.confidence,
                    bounding_box: face.bounding_box,
                });
            }
        }

        Ok(matches)
    }
}

/// Next `stranger_N` label that no known face carries, so strangers are
/// never merged with an identity.
fn next_stranger_label(counter: &mut usize, known: &[KnownFace]) -> String {
    loop {
        *counter += 1;
        let name = format!("{STRANGER_PREFIX}{counter}");
        if !known.iter().any(|k| k.label == name) {
            return name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn known(label: &str, values: &[f32]) -> KnownFace {
        KnownFace {
            id: format!("id-{label}"),
            label: label.into(),
            embedding: Embedding::new(values.to_vec()),
            created_at: String::new(),
        }
    }

    fn detected(values: &[f32], left: i32) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox::from_area(left, 0, 10, 10),
            embedding: Embedding::new(values.to_vec()),
        }
    }

    fn cosine(threshold: f32) -> FaceMatcher {
        FaceMatcher::new(DistanceMetric::Cosine, threshold).unwrap()
    }

    /// Unit vector at the given cosine distance (0.0..=1.0) from `[1, 0]`.
    fn at_cosine_distance(d: f32) -> Vec<f32> {
        let cos = 1.0 - d;
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!(" Euclidean ".parse::<DistanceMetric>(), Ok(DistanceMetric::Euclidean));
        assert_eq!(
            "manhattan".parse::<DistanceMetric>(),
            Err(MatchError::UnknownMetric("manhattan".into()))
        );
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        assert!(FaceMatcher::new(DistanceMetric::Cosine, 1.5).is_err());
        assert!(FaceMatcher::new(DistanceMetric::Cosine, -0.1).is_err());
        assert!(FaceMatcher::new(DistanceMetric::Cosine, f32::NAN).is_err());
        assert!(FaceMatcher::new(DistanceMetric::Cosine, 0.0).is_ok());
        assert!(FaceMatcher::new(DistanceMetric::Cosine, 1.0).is_ok());
    }

    #[test]
    fn test_euclidean_confidence_stays_in_unit_range() {
        let m = DistanceMetric::Euclidean;
        assert_eq!(m.confidence(0.0), 1.0);
        assert!((m.confidence(1.0) - 0.5).abs() < 1e-6);
        let far = m.confidence(1000.0);
        assert!(far > 0.0 && far < 0.01);
    }

    #[test]
    fn test_best_match_empty_known_set() {
        let q = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(cosine(0.7).best_match(&q, &[]), Ok(None));
    }

    #[test]
    fn test_identical_embedding_gives_full_confidence() {
        let gallery = vec![known("alice", &[0.2, 0.9, 0.4]), known("bob", &[0.9, 0.1, 0.0])];
        let q = Embedding::new(vec![0.2, 0.9, 0.4]);
        let best = cosine(0.7).best_match(&q, &gallery).unwrap().unwrap();
        assert_eq!(best.identity, "alice");
        assert_eq!(best.index, 0);
        assert!((best.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_scans_whole_gallery() {
        let gallery = vec![
            known("decoy1", &[0.0, 1.0, 0.0]),
            known("decoy2", &[0.0, 0.0, 1.0]),
            known("match", &[1.0, 0.0, 0.0]),
        ];
        let q = Embedding::new(vec![1.0, 0.0, 0.0]);
        let best = cosine(0.5).best_match(&q, &gallery).unwrap().unwrap();
        assert_eq!(best.identity, "match");
        assert_eq!(best.index, 2);
    }

    #[test]
    fn test_tie_keeps_first_entry() {
        // Both at cosine distance 1 from the query.
        let gallery = vec![known("first", &[0.0, 1.0]), known("second", &[0.0, -1.0])];
        let q = Embedding::new(vec![1.0, 0.0]);
        let best = cosine(0.7).best_match(&q, &gallery).unwrap().unwrap();
        assert_eq!(best.identity, "first");
    }

    #[test]
    fn test_dimension_mismatch_fails_fast() {
        let gallery = vec![known("alice", &[1.0, 0.0, 0.0])];
        let q = Embedding::new(vec![1.0, 0.0]);
        let err = cosine(0.7).best_match(&q, &gallery).unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                expected: 2,
                actual: 3,
                identity: "alice".into()
            }
        );
    }

    #[test]
    fn test_match_faces_empty_known_set_returns_nothing() {
        let faces = vec![detected(&[1.0, 0.0], 0), detected(&[0.0, 1.0], 20)];
        let matches = cosine(0.7).match_faces(&faces, &[]).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_alice_exact_match_scenario() {
        let gallery = vec![known("Alice", &[1.0, 0.0]), known("Bob", &[0.0, 1.0])];
        let faces = vec![detected(&[1.0, 0.0], 5)];
        let matches = cosine(0.70).match_faces(&faces, &gallery).unwrap();

        assert_eq!(matches.len(), 1);
        let alice = matches.get("Alice").unwrap();
        assert!((alice.confidence - 1.0).abs() < 1e-6);
        assert_eq!(alice.bounding_box, BoundingBox::from_area(5, 0, 10, 10));
    }

    #[test]
    fn test_far_face_becomes_stranger_scenario() {
        let gallery = vec![known("Alice", &[1.0, 0.0])];
        let faces = vec![detected(&at_cosine_distance(0.9), 0)];
        let matches = cosine(0.70).match_faces(&faces, &gallery).unwrap();

        assert_eq!(matches.len(), 1);
        assert!(matches.get("Alice").is_none());
        let stranger = matches.get("stranger_1").unwrap();
        assert!((stranger.confidence - 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let gallery = vec![known("Alice", &[1.0, 0.0])];
        // Orthogonal: distance 1, confidence 0; threshold 1 accepts it.
        let faces = vec![detected(&[0.0, 1.0], 0)];
        let matches = cosine(1.0).match_faces(&faces, &gallery).unwrap();
        assert!(matches.get("Alice").is_some());
    }

    #[test]
    fn test_duplicate_identity_keeps_higher_confidence() {
        let gallery = vec![known("Alice", &[1.0, 0.0]), known("Bob", &[-1.0, 0.0])];
        let faces = vec![
            detected(&at_cosine_distance(0.2), 0),
            detected(&at_cosine_distance(0.05), 50),
        ];
        let matches = cosine(0.7).match_faces(&faces, &gallery).unwrap();

        // The weaker Alice is dropped entirely, not relabelled as a stranger.
        assert_eq!(matches.len(), 1);
        let alice = matches.get("Alice").unwrap();
        assert!((alice.confidence - 0.95).abs() < 1e-4);
        assert_eq!(alice.bounding_box.left, 50);
    }

    #[test]
    fn test_strangers_numbered_in_detection_order() {
        let gallery = vec![known("Alice", &[1.0, 0.0])];
        let faces = vec![
            detected(&[0.0, 1.0], 0),
            detected(&[1.0, 0.0], 20),
            detected(&[-1.0, 0.0], 40),
        ];
        let matches = cosine(0.7).match_faces(&faces, &gallery).unwrap();

        let names: Vec<_> = matches.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["stranger_1", "Alice", "stranger_2"]);
        assert_eq!(matches.get("stranger_1").unwrap().bounding_box.left, 0);
        assert_eq!(matches.get("stranger_2").unwrap().bounding_box.left, 40);
    }

    #[test]
    fn test_match_faces_is_deterministic() {
        let gallery = vec![known("Alice", &[1.0, 0.2, 0.1]), known("Bob", &[0.1, 1.0, 0.3])];
        let faces = vec![
            detected(&[0.9, 0.3, 0.1], 0),
            detected(&[0.2, 0.8, 0.5], 20),
            detected(&[-0.5, -0.5, 1.0], 40),
        ];
        let matcher = cosine(0.3);
        let first = matcher.match_faces(&faces, &gallery).unwrap();
        let second = matcher.match_faces(&faces, &gallery).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_euclidean_matching_uses_its_own_confidence() {
        let gallery = vec![known("Alice", &[0.0, 0.0]), known("Bob", &[10.0, 0.0])];
        // Distance 1 from Alice: confidence 0.5.
        let faces = vec![detected(&[1.0, 0.0], 0)];

        let strict = FaceMatcher::new(DistanceMetric::Euclidean, 0.4).unwrap();
        let matches = strict.match_faces(&faces, &gallery).unwrap();
        assert!(matches.get("stranger_1").is_some());

        let loose = FaceMatcher::new(DistanceMetric::Euclidean, 0.6).unwrap();
        let matches = loose.match_faces(&faces, &gallery).unwrap();
        let alice = matches.get("Alice").unwrap();
        assert!((alice.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reserved_labels() {
        assert!(is_reserved_label("stranger_1"));
        assert!(is_reserved_label("stranger_"));
        assert!(!is_reserved_label("Stranger Things"));
        assert!(!is_reserved_label("Alice"));
    }

    #[test]
    fn test_stranger_is_kept_when_known_label_looks_like_one() {
        let gallery = vec![known("stranger_1", &[1.0, 0.0])];
        let matcher = cosine(0.7);

        // Unmatched face first, then the enrolled one.
        let faces = vec![detected(&[-1.0, 0.0], 0), detected(&[1.0, 0.0], 50)];
        let matches = matcher.match_faces(&faces, &gallery).unwrap();
        let names: Vec<_> = matches
            .iter()
            .map(|r| (r.name.as_str(), r.bounding_box.left))
            .collect();
        assert_eq!(names, [("stranger_2", 0), ("stranger_1", 50)]);

        // Enrolled face first, then the unmatched one.
        let faces = vec![detected(&[1.0, 0.0], 50), detected(&[-1.0, 0.0], 0)];
        let matches = matcher.match_faces(&faces, &gallery).unwrap();
        let names: Vec<_> = matches
            .iter()
            .map(|r| (r.name.as_str(), r.bounding_box.left))
            .collect();
        assert_eq!(names, [("stranger_1", 50), ("stranger_2", 0)]);
    }

    #[test]
    fn test_dimension_mismatch_surfaces_from_match_faces() {
        let gallery = vec![known("Alice", &[1.0, 0.0])];
        let faces = vec![detected(&[1.0, 0.0, 0.0], 0)];
        assert!(matches!(
            cosine(0.7).match_faces(&faces, &gallery),
            Err(MatchError::DimensionMismatch { .. })
        ));
    }
}
