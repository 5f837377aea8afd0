use lookalike_core::{AnalyzerError, FaceAnalyzer, FaceMatcher, FaceMatches, KnownFace, MatchError};
use lookalike_store::{FaceStore, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("face store: {0}")]
    Store(#[from] StoreError),
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("multiple faces ({0}) detected in the image; use an image with only one face")]
    MultipleFaces(usize),
}

/// Recognition and enrollment over one analyzer and one store.
pub struct Engine<A> {
    analyzer: A,
    store: FaceStore,
    matcher: FaceMatcher,
}

impl<A: FaceAnalyzer> Engine<A> {
    pub fn new(analyzer: A, store: FaceStore, matcher: FaceMatcher) -> Self {
        Self {
            analyzer,
            store,
            matcher,
        }
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }

    /// Label every face in `image` against a snapshot of the known faces.
    ///
    /// With an empty database the analyzer is not called and the result
    /// is empty.
    pub async fn recognize(&self, image: &[u8]) -> Result<FaceMatches, EngineError> {
        let known = self.store.snapshot().await?;
        if known.is_empty() {
            tracing::info!("no known faces in database");
            return Ok(FaceMatches::new());
        }
        tracing::debug!(known = known.len(), "loaded known faces");

        let faces = self.analyzer.analyze(image).await?;
        tracing::debug!(faces = faces.len(), "faces detected");

        let matches = self.matcher.match_faces(&faces, &known)?;
        tracing::info!(
            detected = faces.len(),
            results = matches.len(),
            "recognition complete"
        );
        Ok(matches)
    }

    /// Extract the single face in `image` and store it under `label`.
    pub async fn enroll(&self, label: &str, image: &[u8]) -> Result<KnownFace, EngineError> {
        let mut embeddings = self.analyzer.represent(image).await?;
        let embedding = match embeddings.len() {
            0 => return Err(EngineError::NoFaceDetected),
            1 => embeddings.remove(0),
            n => return Err(EngineError::MultipleFaces(n)),
        };

        let face = self.store.insert(label, embedding).await?;
        tracing::info!(label, id = %face.id, "enrolled face");
        Ok(face)
    }
}
