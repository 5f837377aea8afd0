//! Client side of the external face-analysis service.
//!
//! Detection and embedding extraction are delegated to a DeepFace REST
//! service (`deepface api`, port 5005 by default). This module only moves
//! bytes in and parses bounding boxes and vectors out; no model runs
//! in-process.

use crate::types::{BoundingBox, DetectedFace, Embedding};
use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

pub const DEFAULT_ANALYZER_URL: &str = "http://127.0.0.1:5005";
pub const DEFAULT_MODEL: &str = "Facenet512";
pub const DEFAULT_DETECTOR_BACKEND: &str = "retinaface";

/// Substring of the error DeepFace returns when `enforce_detection` finds
/// no face.
const NO_FACE_MARKER: &str = "Face could not be detected";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("inference service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("inference service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("invalid response from inference service: {0}")]
    InvalidResponse(String),
}

/// Source of faces for an image.
///
/// `detect` and `represent` are independent so callers can run them
/// concurrently; `analyze` pairs them. Backends that produce boxes and
/// embeddings in one pass override `analyze`.
pub trait FaceAnalyzer: Send + Sync {
    /// Locate faces, in detector order.
    fn detect(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<BoundingBox>, AnalyzerError>> + Send;

    /// Extract one embedding per face, in detector order.
    fn represent(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<Embedding>, AnalyzerError>> + Send;

    /// Every face with its box and embedding.
    fn analyze(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Vec<DetectedFace>, AnalyzerError>> + Send {
        detect_and_represent(self, image)
    }
}

/// Run detection and embedding extraction concurrently and pair the results.
///
/// Either call failing fails the whole analysis. If the two sides disagree
/// on the face count, the extra entries are dropped.
pub async fn detect_and_represent<A: FaceAnalyzer + ?Sized>(
    analyzer: &A,
    image: &[u8],
) -> Result<Vec<DetectedFace>, AnalyzerError> {
    let (boxes, embeddings) = tokio::try_join!(analyzer.detect(image), analyzer.represent(image))?;

    if boxes.len() != embeddings.len() {
        tracing::warn!(
            detected = boxes.len(),
            embeddings = embeddings.len(),
            "face count differs between detection and embedding extraction"
        );
    }

    Ok(boxes
        .into_iter()
        .zip(embeddings)
        .map(|(bounding_box, embedding)| DetectedFace {
            bounding_box,
            embedding,
        })
        .collect())
}

/// Connection settings for the inference service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Base URL, e.g. `http://127.0.0.1:5005`.
    pub url: String,
    /// Embedding model name as understood by the service.
    pub model: String,
    pub detector_backend: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ANALYZER_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            detector_backend: DEFAULT_DETECTOR_BACKEND.to_string(),
        }
    }
}

/// [`FaceAnalyzer`] backed by DeepFace's `POST /represent`.
///
/// One request returns each face's `facial_area` next to its embedding, so
/// [`FaceAnalyzer::analyze`] costs a single round trip.
#[derive(Debug, Clone)]
pub struct RemoteAnalyzer {
    config: AnalyzerConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct RepresentRequest<'a> {
    img: String,
    model_name: &'a str,
    detector_backend: &'a str,
    enforce_detection: bool,
    align: bool,
}

impl RemoteAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Same service and detector, different embedding model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            config: AnalyzerConfig {
                model: model.to_string(),
                ..self.config.clone()
            },
            client: self.client.clone(),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.url.trim_end_matches('/'))
    }

    fn request<'a>(&'a self, image: &[u8]) -> RepresentRequest<'a> {
        RepresentRequest {
            img: data_uri(image),
            model_name: &self.config.model,
            detector_backend: &self.config.detector_backend,
            enforce_detection: true,
            align: true,
        }
    }

    async fn represent_faces(&self, image: &[u8]) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let response = self
            .client
            .post(self.endpoint("represent"))
            .json(&self.request(image))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if is_no_face_error(status, &body) {
            tracing::debug!("inference service found no face");
            return Ok(Vec::new());
        }
        if !(200..300).contains(&status) {
            return Err(AnalyzerError::Service { status, body });
        }

        let faces = parse_represent(&body, &self.config.model)?;
        tracing::debug!(
            faces = faces.len(),
            model = %self.config.model,
            detector = %self.config.detector_backend,
            "represent finished"
        );
        Ok(faces)
    }
}

impl FaceAnalyzer for RemoteAnalyzer {
    async fn detect(&self, image: &[u8]) -> Result<Vec<BoundingBox>, AnalyzerError> {
        let faces = self.represent_faces(image).await?;
        Ok(faces.into_iter().map(|f| f.bounding_box).collect())
    }

    async fn represent(&self, image: &[u8]) -> Result<Vec<Embedding>, AnalyzerError> {
        let faces = self.represent_faces(image).await?;
        Ok(faces.into_iter().map(|f| f.embedding).collect())
    }

    async fn analyze(&self, image: &[u8]) -> Result<Vec<DetectedFace>, AnalyzerError> {
        self.represent_faces(image).await
    }
}

/// Inline image as DeepFace accepts it in the `img` field.
fn data_uri(image: &[u8]) -> String {
    let mime = if image.starts_with(b"\x89PNG") {
        "image/png"
    } else {
        "image/jpeg"
    };
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(image))
}

fn is_no_face_error(status: u16, body: &str) -> bool {
    status == 400 && body.contains(NO_FACE_MARKER)
}

#[derive(Deserialize)]
struct Envelope {
    results: Vec<RepresentedFace>,
}

#[derive(Deserialize)]
struct FacialArea {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl FacialArea {
    fn to_bounding_box(&self) -> BoundingBox {
        BoundingBox::from_area(
            self.x.round() as i32,
            self.y.round() as i32,
            self.w.round() as i32,
            self.h.round() as i32,
        )
    }
}

#[derive(Deserialize)]
struct RepresentedFace {
    embedding: Vec<f32>,
    facial_area: FacialArea,
}

fn parse_represent(body: &str, model: &str) -> Result<Vec<DetectedFace>, AnalyzerError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| AnalyzerError::InvalidResponse(format!("represent: {e}")))?;

    envelope
        .results
        .into_iter()
        .map(|face| {
            if face.embedding.is_empty() || face.embedding.iter().any(|v| !v.is_finite()) {
                return Err(AnalyzerError::InvalidResponse(
                    "represent: empty or non-finite embedding".into(),
                ));
            }
            Ok(DetectedFace {
                bounding_box: face.facial_area.to_bounding_box(),
                embedding: Embedding {
                    values: face.embedding,
                    model_version: Some(model.to_string()),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `POST /represent` reply from `deepface api` (Facenet, retinaface),
    /// embeddings cut to four values.
    const REPRESENT_TWO_FACES: &str = r#"{
      "results": [
        {
          "embedding": [0.4817, -1.2093, 0.0731, 2.2150],
          "face_confidence": 1.0,
          "facial_area": {
            "h": 181, "w": 141, "x": 403, "y": 77,
            "left_eye": [499, 149], "right_eye": [443, 148]
          }
        },
        {
          "embedding": [-0.9011, 0.3342, 1.7770, -0.0412],
          "face_confidence": 0.99,
          "facial_area": {
            "h": 96, "w": 74, "x": 112, "y": 60,
            "left_eye": null, "right_eye": null
          }
        }
      ]
    }"#;

    const REPRESENT_NO_FACE: &str = r#"{"error": "Exception while representing: Face could not be detected in numpy array.Please confirm that the picture is a face photo or consider to set enforce_detection param to False."}"#;

    struct StubAnalyzer {
        boxes: Vec<BoundingBox>,
        embeddings: Vec<Embedding>,
        fail_represent: bool,
    }

    impl FaceAnalyzer for StubAnalyzer {
        async fn detect(&self, _image: &[u8]) -> Result<Vec<BoundingBox>, AnalyzerError> {
            Ok(self.boxes.clone())
        }

        async fn represent(&self, _image: &[u8]) -> Result<Vec<Embedding>, AnalyzerError> {
            if self.fail_represent {
                return Err(AnalyzerError::Service {
                    status: 500,
                    body: "model crashed".into(),
                });
            }
            Ok(self.embeddings.clone())
        }
    }

    #[test]
    fn test_parse_represent_payload() {
        let faces = parse_represent(REPRESENT_TWO_FACES, "Facenet").unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bounding_box, BoundingBox::from_area(403, 77, 141, 181));
        assert_eq!(faces[0].embedding.values, vec![0.4817, -1.2093, 0.0731, 2.2150]);
        assert_eq!(faces[0].embedding.model_version.as_deref(), Some("Facenet"));
        assert_eq!(faces[1].bounding_box.left, 112);
        assert_eq!(faces[1].bounding_box.bottom, 156);
    }

    #[test]
    fn test_no_face_reply_is_recognized() {
        assert!(is_no_face_error(400, REPRESENT_NO_FACE));
        assert!(!is_no_face_error(500, REPRESENT_NO_FACE));
        assert!(!is_no_face_error(400, r#"{"error": "Invalid model_name"}"#));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_represent("not json", "m"),
            Err(AnalyzerError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_represent(
                r#"{"results":[{"embedding":[],"facial_area":{"x":0,"y":0,"w":1,"h":1}}]}"#,
                "m"
            ),
            Err(AnalyzerError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_body_matches_deepface_api() {
        let analyzer = RemoteAnalyzer::new(AnalyzerConfig {
            model: "ArcFace".into(),
            ..AnalyzerConfig::default()
        });
        let body = serde_json::to_value(analyzer.request(b"\x89PNG\r\n\x1a\nrest")).unwrap();
        assert_eq!(body["model_name"], "ArcFace");
        assert_eq!(body["detector_backend"], "retinaface");
        assert_eq!(body["enforce_detection"], true);
        assert_eq!(body["align"], true);
        let img = body["img"].as_str().unwrap();
        assert!(img.starts_with("data:image/png;base64,"));
        assert_eq!(
            BASE64_STANDARD.decode(&img["data:image/png;base64,".len()..]).unwrap(),
            b"\x89PNG\r\n\x1a\nrest"
        );

        assert!(data_uri(&[0xFF, 0xD8, 0xFF]).starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let analyzer = RemoteAnalyzer::new(AnalyzerConfig {
            url: "http://inference:5005/".into(),
            ..AnalyzerConfig::default()
        });
        assert_eq!(analyzer.endpoint("represent"), "http://inference:5005/represent");
        let arcface = analyzer.with_model("ArcFace");
        assert_eq!(arcface.config().model, "ArcFace");
        assert_eq!(arcface.config().url, "http://inference:5005/");
    }

    #[tokio::test]
    async fn test_analyze_pairs_in_detection_order() {
        let stub = StubAnalyzer {
            boxes: vec![
                BoundingBox::from_area(0, 0, 10, 10),
                BoundingBox::from_area(50, 0, 10, 10),
            ],
            embeddings: vec![Embedding::new(vec![1.0, 0.0]), Embedding::new(vec![0.0, 1.0])],
            fail_represent: false,
        };
        let faces = stub.analyze(b"img").await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].bounding_box.left, 50);
        assert_eq!(faces[1].embedding.values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_analyze_truncates_to_shorter_side() {
        let stub = StubAnalyzer {
            boxes: vec![BoundingBox::from_area(0, 0, 10, 10)],
            embeddings: vec![Embedding::new(vec![1.0]), Embedding::new(vec![2.0])],
            fail_represent: false,
        };
        let faces = detect_and_represent(&stub, b"img").await.unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[tokio::test]
    async fn test_analyze_fails_if_either_side_fails() {
        let stub = StubAnalyzer {
            boxes: vec![BoundingBox::from_area(0, 0, 10, 10)],
            embeddings: vec![],
            fail_represent: true,
        };
        assert!(matches!(
            stub.analyze(b"img").await,
            Err(AnalyzerError::Service { status: 500, .. })
        ));
    }
}
