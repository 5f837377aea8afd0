use anyhow::{Context, Result};
use lookalike_core::{AnalyzerConfig, DistanceMetric, FaceMatcher, MatchError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Server configuration.
///
/// Read from the TOML file named by `LOOKALIKE_CONFIG` (if set), then
/// overridden field by field by `LOOKALIKE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:8000).
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Legacy CSV of embeddings, imported on startup into an empty database.
    pub import_csv: Option<PathBuf>,
    /// Inference service used for detection and embeddings.
    pub analyzer: AnalyzerConfig,
    pub distance_metric: DistanceMetric,
    /// Match strictness in [0, 1]; lower is stricter.
    pub threshold: f32,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            db_path: default_data_dir().join("faces.db"),
            import_csv: None,
            analyzer: AnalyzerConfig::default(),
            distance_metric: DistanceMetric::Cosine,
            threshold: 0.70,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from `LOOKALIKE_CONFIG` and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("LOOKALIKE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Override fields from environment variables looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("LOOKALIKE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = var("LOOKALIKE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("LOOKALIKE_IMPORT_CSV") {
            self.import_csv = Some(PathBuf::from(v));
        }
        if let Some(v) = var("LOOKALIKE_ANALYZER_URL") {
            self.analyzer.url = v;
        }
        if let Some(v) = var("LOOKALIKE_MODEL") {
            self.analyzer.model = v;
        }
        if let Some(v) = var("LOOKALIKE_DETECTOR_BACKEND") {
            self.analyzer.detector_backend = v;
        }
        if let Some(v) = var("LOOKALIKE_DISTANCE_METRIC") {
            self.distance_metric = parse_var("LOOKALIKE_DISTANCE_METRIC", &v)?;
        }
        if let Some(v) = var("LOOKALIKE_THRESHOLD") {
            self.threshold = parse_var("LOOKALIKE_THRESHOLD", &v)?;
        }
        if let Some(v) = var("LOOKALIKE_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_var("LOOKALIKE_MAX_UPLOAD_BYTES", &v)?;
        }
        Ok(())
    }

    /// Build the matcher, validating metric and threshold.
    pub fn matcher(&self) -> Result<FaceMatcher, MatchError> {
        FaceMatcher::new(self.distance_metric, self.threshold)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("lookalike")
}
