//! Test doubles shared by the server's unit tests.

use lookalike_core::{AnalyzerError, BoundingBox, DetectedFace, Embedding, FaceAnalyzer};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the same faces for every image.
pub struct StubAnalyzer {
    faces: Vec<DetectedFace>,
    calls: AtomicUsize,
}

impl StubAnalyzer {
    pub fn new(faces: Vec<DetectedFace>) -> Self {
        Self {
            faces,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of detect/represent calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceAnalyzer for StubAnalyzer {
    async fn detect(&self, _image: &[u8]) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.iter().map(|f| f.bounding_box).collect())
    }

    async fn represent(&self, _image: &[u8]) -> Result<Vec<Embedding>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.iter().map(|f| f.embedding.clone()).collect())
    }
}

/// A 10x10 face at horizontal offset `left`.
pub fn face(left: i32, values: &[f32]) -> DetectedFace {
    DetectedFace {
        bounding_box: BoundingBox::from_area(left, 0, 10, 10),
        embedding: Embedding::new(values.to_vec()),
    }
}
