//! Embedding-model benchmark.
//!
//! For each model, a reference image of one person is compared against more
//! images of the same person (positives) and images of other people
//! (negatives). Similarity is the best cosine similarity over the faces
//! found in the test image; speed is the wall time of one embedding call.

use anyhow::{Context, Result};
use lookalike_core::{Embedding, FaceAnalyzer};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const DETAILED_CSV: &str = "face_recognition_benchmark_detailed.csv";
pub const SUMMARY_CSV: &str = "face_recognition_benchmark_summary.csv";

pub const DEFAULT_MODELS: [&str; 5] = ["Facenet512", "Facenet", "ArcFace", "VGG-Face", "SFace"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Reference,
    Positive,
    Negative,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Reference => "reference",
            ImageType::Positive => "positive",
            ImageType::Negative => "negative",
        }
    }
}

/// One measured image for one model.
#[derive(Debug, Clone)]
pub struct BenchmarkRecord {
    pub timestamp: String,
    pub model: String,
    pub image_type: ImageType,
    pub image_path: PathBuf,
    pub similarity_score: f32,
    /// Seconds spent in the embedding call.
    pub computation_time: f64,
    pub embedding_length: usize,
    pub faces_detected: usize,
    pub time_per_face: f64,
}

pub struct BenchmarkPlan {
    pub reference: PathBuf,
    pub positives: Vec<PathBuf>,
    pub negatives: Vec<PathBuf>,
}

struct Measurement {
    embeddings: Vec<Embedding>,
    elapsed: f64,
}

impl Measurement {
    fn time_per_face(&self) -> f64 {
        if self.embeddings.is_empty() {
            0.0
        } else {
            self.elapsed / self.embeddings.len() as f64
        }
    }
}

async fn measure<A: FaceAnalyzer>(analyzer: &A, path: &Path) -> Result<Measurement> {
    let image = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let start = Instant::now();
    let embeddings = analyzer.represent(&image).await?;
    Ok(Measurement {
        embeddings,
        elapsed: start.elapsed().as_secs_f64(),
    })
}

/// Benchmark one model. Fails only if the reference image yields no face.
pub async fn run_model<A: FaceAnalyzer>(
    model: &str,
    analyzer: &A,
    plan: &BenchmarkPlan,
) -> Result<Vec<BenchmarkRecord>> {
    let reference = measure(analyzer, &plan.reference).await?;
    let Some(reference_embedding) = reference.embeddings.first() else {
        anyhow::bail!("no face in reference image {}", plan.reference.display());
    };
    let embedding_length = reference_embedding.dimensions();

    let mut records = vec![BenchmarkRecord {
        timestamp: chrono::Local::now().to_rfc3339(),
        model: model.to_string(),
        image_type: ImageType::Reference,
        image_path: plan.reference.clone(),
        similarity_score: 1.0,
        computation_time: reference.elapsed,
        embedding_length,
        faces_detected: reference.embeddings.len(),
        time_per_face: reference.time_per_face(),
    }];

    let tests = plan
        .positives
        .iter()
        .map(|p| (ImageType::Positive, p))
        .chain(plan.negatives.iter().map(|p| (ImageType::Negative, p)));

    for (image_type, path) in tests {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "test image not found; skipping");
            continue;
        }
        let measurement = match measure(analyzer, path).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(model, path = %path.display(), error = %e, "embedding failed");
                Measurement {
                    embeddings: Vec::new(),
                    elapsed: 0.0,
                }
            }
        };

        let similarity_score = measurement
            .embeddings
            .iter()
            .map(|e| reference_embedding.similarity(e))
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
            .unwrap_or(0.0);

        tracing::info!(
            model,
            image = %path.display(),
            kind = image_type.as_str(),
            similarity = similarity_score,
            seconds = measurement.elapsed,
            "benchmarked image"
        );

        records.push(BenchmarkRecord {
            timestamp: chrono::Local::now().to_rfc3339(),
            model: model.to_string(),
            image_type,
            image_path: path.clone(),
            similarity_score,
            computation_time: measurement.elapsed,
            embedding_length,
            faces_detected: measurement.embeddings.len(),
            time_per_face: measurement.time_per_face(),
        });
    }

    Ok(records)
}

/// Mean, sample standard deviation, min and max.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean: f64,
    /// `None` with fewer than two samples.
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.len() > 1).then(|| {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        });
        Some(Self {
            mean,
            std,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Per-model aggregate over all of its records.
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub model: String,
    pub computation_time: Stats,
    pub time_per_face: Stats,
    pub similarity_score: Stats,
    pub embedding_length: usize,
    pub faces_detected_sum: usize,
    pub faces_detected_mean: f64,
    /// Mean similarity on positives and on negatives.
    pub positive_mean: Option<f64>,
    pub negative_mean: Option<f64>,
}

impl ModelSummary {
    /// Gap between same-person and other-person similarity; higher separates better.
    pub fn separation(&self) -> Option<f64> {
        Some(self.positive_mean? - self.negative_mean?)
    }
}

/// Summaries in first-seen model order.
pub fn summarize(records: &[BenchmarkRecord]) -> Vec<ModelSummary> {
    let mut models: Vec<&str> = Vec::new();
    for r in records {
        if !models.contains(&r.model.as_str()) {
            models.push(&r.model);
        }
    }

    models
        .into_iter()
        .filter_map(|model| {
            let rows: Vec<&BenchmarkRecord> = records.iter().filter(|r| r.model == model).collect();
            let column =
                |f: fn(&BenchmarkRecord) -> f64| rows.iter().map(|r| f(r)).collect::<Vec<_>>();
            let mean_of = |kind: ImageType| {
                let v: Vec<f64> = rows
                    .iter()
                    .filter(|r| r.image_type == kind)
                    .map(|r| r.similarity_score as f64)
                    .collect();
                Stats::of(&v).map(|s| s.mean)
            };
            let faces: Vec<f64> = column(|r| r.faces_detected as f64);

            Some(ModelSummary {
                model: model.to_string(),
                computation_time: Stats::of(&column(|r| r.computation_time))?,
                time_per_face: Stats::of(&column(|r| r.time_per_face))?,
                similarity_score: Stats::of(&column(|r| r.similarity_score as f64))?,
                embedding_length: rows.first()?.embedding_length,
                faces_detected_sum: rows.iter().map(|r| r.faces_detected).sum(),
                faces_detected_mean: Stats::of(&faces)?.mean,
                positive_mean: mean_of(ImageType::Positive),
                negative_mean: mean_of(ImageType::Negative),
            })
        })
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn round4(v: f64) -> String {
    format!("{:.4}", v)
}

pub fn detailed_csv(records: &[BenchmarkRecord]) -> String {
    let mut out = String::from(
        "timestamp,model,image_type,image_path,similarity_score,computation_time,embedding_length,faces_detected,time_per_face\n",
    );
    for r in records {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            r.timestamp,
            csv_field(&r.model),
            r.image_type.as_str(),
            csv_field(&r.image_path.to_string_lossy()),
            r.similarity_score,
            r.computation_time,
            r.embedding_length,
            r.faces_detected,
            r.time_per_face,
        );
    }
    out
}

pub fn summary_csv(summaries: &[ModelSummary]) -> String {
    let mut out = String::from("model");
    for column in ["computation_time", "time_per_face", "similarity_score"] {
        for stat in ["mean", "std", "min", "max"] {
            let _ = write!(out, ",{column}_{stat}");
        }
    }
    out.push_str(",embedding_length,faces_detected_sum,faces_detected_mean\n");

    for s in summaries {
        out.push_str(&csv_field(&s.model));
        for stats in [&s.computation_time, &s.time_per_face, &s.similarity_score] {
            let std = stats.std.map(round4).unwrap_or_default();
            let _ = write!(
                out,
                ",{},{},{},{}",
                round4(stats.mean),
                std,
                round4(stats.min),
                round4(stats.max)
            );
        }
        let _ = writeln!(
            out,
            ",{},{},{}",
            s.embedding_length,
            s.faces_detected_sum,
            round4(s.faces_detected_mean)
        );
    }
    out
}

/// Write both CSV files into `out_dir`, returning their paths.
pub fn write_reports(records: &[BenchmarkRecord], out_dir: &Path) -> Result<[PathBuf; 2]> {
    std::fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let detailed = out_dir.join(DETAILED_CSV);
    let summary = out_dir.join(SUMMARY_CSV);
    std::fs::write(&detailed, detailed_csv(records))
        .with_context(|| format!("writing {}", detailed.display()))?;
    std::fs::write(&summary, summary_csv(&summarize(records)))
        .with_context(|| format!("writing {}", summary.display()))?;
    Ok([detailed, summary])
}
