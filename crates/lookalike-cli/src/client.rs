//! HTTP client for a running `lookalike-server`.

use anyhow::{bail, Context, Result};
use lookalike_core::MatchResult;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct RecognizeResponse {
    pub faces: Vec<MatchResult>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollResponse {
    pub message: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StoredFace {
    pub id: String,
    pub label: String,
    pub dimensions: usize,
    pub model_version: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ListResponse {
    pub faces: Vec<StoredFace>,
}

pub struct ServerClient {
    base: String,
    client: reqwest::Client,
}

impl ServerClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn recognize(&self, image: &Path) -> Result<RecognizeResponse> {
        let form = Form::new().part("file", file_part(image)?);
        let response = self
            .client
            .post(self.url("/recognize_faces/"))
            .multipart(form)
            .send()
            .await
            .context("sending recognize request")?;
        decode(response).await
    }

    pub async fn enroll(&self, name: &str, image: &Path) -> Result<EnrollResponse> {
        let form = Form::new()
            .part("file", file_part(image)?)
            .text("name", name.to_string());
        let response = self
            .client
            .post(self.url("/add_face/"))
            .multipart(form)
            .send()
            .await
            .context("sending enroll request")?;
        decode(response).await
    }

    pub async fn list(&self) -> Result<ListResponse> {
        let response = self
            .client
            .get(self.url("/faces/"))
            .send()
            .await
            .context("listing faces")?;
        decode(response).await
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(&format!("/faces/{id}")))
            .send()
            .await
            .context("removing face")?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body: serde_json::Value = decode(response).await?;
        Ok(body["removed"].as_bool().unwrap_or(false))
    }

    pub async fn status(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .context("querying server status")?;
        decode(response).await
    }
}

fn file_part(path: &Path) -> Result<Part> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes).file_name(filename))
}

/// Decode a JSON body, turning `{"error": ...}` replies into errors.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await.context("reading response body")?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(body);
        bail!("server returned {status}: {message}");
    }
    serde_json::from_str(&body).with_context(|| format!("unexpected response: {body}"))
}
