use serde::{Deserialize, Serialize};

/// Face location in image pixels, in `(top, right, bottom, left)` order.
///
/// Serialized as the 4-element array `[top, right, bottom, left]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    /// Build from a detector's `(x, y, width, height)` facial area.
    pub fn from_area(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            top: y,
            right: x + w,
            bottom: y + h,
            left: x,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from([top, right, bottom, left]: [i32; 4]) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.right, b.bottom, b.left]
    }
}

/// Face embedding vector (128-dimensional for dlib, 512 for Facenet512/ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "Facenet512").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// A zero-norm vector has similarity 0 with everything.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled identity sample.
///
/// The same label may appear several times (one row per sample);
/// `id` is what distinguishes stored rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFace {
    pub id: String,
    pub label: String,
    pub embedding: Embedding,
    pub created_at: String,
}

/// A face found in a query image by the external detector.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// Outcome for one face of a query image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Known identity, or a generated `stranger_N` label.
    pub name: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// Per-image results keyed by identity, in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceMatches {
    results: Vec<MatchResult>,
}

impl FaceMatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&MatchResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Record `result`, keeping the higher-confidence entry when the name is
    /// already present. Returns `true` if `result` was kept.
    pub fn upsert_best(&mut self, result: MatchResult) -> bool {
        match self.results.iter_mut().find(|r| r.name == result.name) {
            Some(existing) if result.confidence > existing.confidence => {
                *existing = result;
                true
            }
            Some(_) => false,
            None => {
                self.results.push(result);
                true
            }
        }
    }

    pub(crate) fn push(&mut self, result: MatchResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchResult> {
        self.results.iter()
    }

    pub fn into_results(self) -> Vec<MatchResult> {
        self.results
    }
}
