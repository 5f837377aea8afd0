//! HTTP interface of the lookalike backend.
//!
//! Routes:
//! - `POST /recognize_faces/`: multipart `file`; returns `{"faces": [...]}`
//! - `POST /add_face/`: multipart `file` + `name`; enrolls one face
//! - `GET /faces/`: enrolled samples
//! - `DELETE /faces/:id`: remove one sample
//! - `GET /health`: service status

use crate::engine::Engine;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use lookalike_core::{DistanceMetric, FaceAnalyzer, MatchResult};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState<A> {
    engine: Arc<Engine<A>>,
    /// Embedding model reported by `/health`.
    model: Arc<str>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            model: Arc::clone(&self.model),
        }
    }
}

pub fn router<A>(engine: Arc<Engine<A>>, model: &str, max_upload_bytes: usize) -> Router
where
    A: FaceAnalyzer + 'static,
{
    let state = AppState {
        engine,
        model: Arc::from(model),
    };

    Router::new()
        .route("/health", get(health::<A>))
        .route("/recognize_faces/", post(recognize_faces::<A>))
        .route("/add_face/", post(add_face::<A>))
        .route("/faces/", get(list_faces::<A>))
        .route("/faces/:id", delete(remove_face::<A>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Default)]
struct Upload {
    file: Option<Bytes>,
    name: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("<unnamed>").to_string();
                let bytes = field.bytes().await?;
                tracing::debug!(filename = %filename, size = bytes.len(), "received file");
                upload.file = Some(bytes);
            }
            Some("name") => upload.name = Some(field.text().await?),
            other => tracing::debug!(field = ?other, "ignoring multipart field"),
        }
    }
    Ok(upload)
}

/// Reject uploads the image decoder cannot read before paying for inference.
async fn ensure_decodable(bytes: Bytes) -> Result<Bytes, ApiError> {
    let check = bytes.clone();
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&check))
        .await
        .map_err(|e| ApiError::Internal(format!("image decode task failed: {e}")))?;

    match decoded {
        Ok(img) => {
            tracing::debug!(width = img.width(), height = img.height(), "image decoded");
            Ok(bytes)
        }
        Err(e) => {
            tracing::debug!(error = %e, "image decode failed");
            Err(ApiError::BadRequest("Failed to decode image".into()))
        }
    }
}

#[derive(Serialize)]
struct RecognizeResponse {
    faces: Vec<MatchResult>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    known_faces: usize,
    distance_metric: DistanceMetric,
    threshold: f32,
    model: String,
}

async fn recognize_faces<A: FaceAnalyzer>(
    State(state): State<AppState<A>>,
    multipart: Multipart,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let file = upload
        .file
        .ok_or_else(|| ApiError::BadRequest("No file provided".into()))?;
    let image = ensure_decodable(file).await?;

    let matches = state.engine.recognize(&image).await?;
    tracing::info!(faces = matches.len(), "returning recognition results");
    Ok(Json(RecognizeResponse {
        faces: matches.into_results(),
    }))
}

async fn add_face<A: FaceAnalyzer>(
    State(state): State<AppState<A>>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let upload = read_upload(multipart).await?;
    let name = upload
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let (Some(file), Some(name)) = (upload.file, name) else {
        return Err(ApiError::BadRequest("Both image and name are required.".into()));
    };
    let image = ensure_decodable(file).await?;

    let face = state.engine.enroll(&name, &image).await?;
    Ok(Json(json!({
        "message": format!("Successfully added {name} to the database"),
        "id": face.id,
    })))
}

async fn list_faces<A: FaceAnalyzer>(
    State(state): State<AppState<A>>,
) -> Result<Json<Value>, ApiError> {
    let faces = state.engine.store().list().await?;
    Ok(Json(json!({ "faces": faces })))
}

async fn remove_face<A: FaceAnalyzer>(
    State(state): State<AppState<A>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.engine.store().remove(&id).await? {
        return Err(ApiError::NotFound(format!("no face with id {id}")));
    }
    tracing::info!(id = %id, "removed face");
    Ok(Json(json!({ "removed": true })))
}

async fn health<A: FaceAnalyzer>(
    State(state): State<AppState<A>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let matcher = state.engine.matcher();
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        known_faces: state.engine.store().count().await?,
        distance_metric: matcher.metric(),
        threshold: matcher.threshold(),
        model: state.model.to_string(),
    }))
}
