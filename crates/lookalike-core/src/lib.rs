//! lookalike-core — Face matching against a set of known identities.
//!
//! Detection and embedding extraction happen in an external inference
//! service (see [`analyzer`]); this crate pairs its output and classifies
//! each face as a known identity or a stranger (see [`matcher`]).

pub mod analyzer;
pub mod matcher;
pub mod types;

pub use analyzer::{
    detect_and_represent, AnalyzerConfig, AnalyzerError, FaceAnalyzer, RemoteAnalyzer,
};
pub use matcher::{
    is_reserved_label, BestMatch, DistanceMetric, FaceMatcher, MatchError, STRANGER_PREFIX,
};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceMatches, KnownFace, MatchResult};
