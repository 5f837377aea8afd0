use anyhow::Result;
use clap::{Parser, Subcommand};
use lookalike_core::{AnalyzerConfig, RemoteAnalyzer};
use std::path::PathBuf;

mod benchmark;
mod client;

use benchmark::{BenchmarkPlan, DEFAULT_MODELS};
use client::ServerClient;

#[derive(Parser)]
#[command(name = "lookalike", about = "Lookalike face recognition CLI")]
struct Cli {
    /// Base URL of lookalike-server
    #[arg(long, env = "LOOKALIKE_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize every face in an image
    Recognize {
        image: PathBuf,
    },
    /// Add a known face from an image containing exactly one face
    Enroll {
        /// Name to store the face under
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// List known faces
    List,
    /// Remove a known face
    Remove {
        /// Face ID to remove
        id: String,
    },
    /// Show server status
    Status,
    /// Compare embedding models on similarity and speed
    Benchmark {
        /// Image of the person every other image is compared to
        #[arg(long)]
        reference: PathBuf,
        /// Other images of the same person
        #[arg(long = "positive")]
        positives: Vec<PathBuf>,
        /// Images of other people
        #[arg(long = "negative")]
        negatives: Vec<PathBuf>,
        /// Models to test (repeatable); defaults to a standard set
        #[arg(long = "model")]
        models: Vec<String>,
        /// Inference service URL
        #[arg(
            long,
            env = "LOOKALIKE_ANALYZER_URL",
            default_value = lookalike_core::analyzer::DEFAULT_ANALYZER_URL
        )]
        analyzer_url: String,
        #[arg(long, default_value = lookalike_core::analyzer::DEFAULT_DETECTOR_BACKEND)]
        detector_backend: String,
        /// Directory for the CSV reports
        #[arg(long, default_value = "benchmark_results")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let server = ServerClient::new(&cli.server);

    match cli.command {
        Commands::Recognize { image } => {
            let response = server.recognize(&image).await?;
            if response.faces.is_empty() {
                println!("No faces found");
            }
            for face in response.faces {
                let b = face.bounding_box;
                println!(
                    "{:<24} {:>6.1}%  top={} right={} bottom={} left={}",
                    face.name,
                    face.confidence * 100.0,
                    b.top,
                    b.right,
                    b.bottom,
                    b.left
                );
            }
        }
        Commands::Enroll { name, image } => {
            let response = server.enroll(&name, &image).await?;
            println!("{} (id {})", response.message, response.id);
        }
        Commands::List => {
            let response = server.list().await?;
            if response.faces.is_empty() {
                println!("No faces enrolled");
            }
            for face in response.faces {
                println!(
                    "{}  {:<24} {:>5}d  {:<12} {}",
                    face.id,
                    face.label,
                    face.dimensions,
                    face.model_version.as_deref().unwrap_or("-"),
                    face.created_at
                );
            }
        }
        Commands::Remove { id } => {
            if server.remove(&id).await? {
                println!("Removed face {id}");
            } else {
                println!("No face with id {id}");
            }
        }
        Commands::Status => match server.status().await {
            Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            Err(e) => println!("lookalike-server: not reachable ({e})"),
        },
        Commands::Benchmark {
            reference,
            positives,
            negatives,
            models,
            analyzer_url,
            detector_backend,
            out_dir,
        } => {
            let models = if models.is_empty() {
                DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
            } else {
                models
            };
            let plan = BenchmarkPlan {
                reference,
                positives,
                negatives,
            };
            let base = RemoteAnalyzer::new(AnalyzerConfig {
                url: analyzer_url,
                detector_backend,
                ..AnalyzerConfig::default()
            });

            let mut records = Vec::new();
            for model in &models {
                tracing::info!(model = %model, "benchmarking model");
                match benchmark::run_model(model, &base.with_model(model), &plan).await {
                    Ok(r) => records.extend(r),
                    Err(e) => tracing::warn!(model = %model, error = %e, "skipping model"),
                }
            }
            if records.is_empty() {
                anyhow::bail!("no model produced results");
            }

            let [detailed, summary] = benchmark::write_reports(&records, &out_dir)?;
            println!("Detailed results: {}", detailed.display());
            println!("Summary: {}", summary.display());
            println!();
            println!(
                "{:<12} {:>10} {:>10} {:>11} {:>10}",
                "model", "positive", "negative", "separation", "sec/face"
            );
            let fmt = |v: Option<f64>| v.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into());
            for s in benchmark::summarize(&records) {
                println!(
                    "{:<12} {:>10} {:>10} {:>11} {:>10.4}",
                    s.model,
                    fmt(s.positive_mean),
                    fmt(s.negative_mean),
                    fmt(s.separation()),
                    s.time_per_face.mean
                );
            }
        }
    }

    Ok(())
}
