use anyhow::{Context, Result};
use lookalike_core::{DistanceMetric, RemoteAnalyzer};
use lookalike_store::FaceStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod routes;

#[cfg(test)]
mod testing;

use config::Config;
use engine::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("lookalike-server starting");

    let config = Config::load()?;
    let matcher = config.matcher().context("invalid matcher settings")?;
    if matcher.metric() == DistanceMetric::Euclidean {
        tracing::warn!(
            threshold = matcher.threshold(),
            "euclidean metric: confidence is 1 / (1 + distance); tune the threshold accordingly"
        );
    }

    let store = FaceStore::open(&config.db_path)
        .await
        .with_context(|| format!("opening face store at {}", config.db_path.display()))?;

    if let Some(csv) = &config.import_csv {
        if store.count().await? == 0 {
            lookalike_store::import_csv(&store, csv, Some(&config.analyzer.model))
                .await
                .with_context(|| format!("importing {}", csv.display()))?;
        } else {
            tracing::info!(path = %csv.display(), "database not empty; skipping CSV import");
        }
    }
    tracing::info!(known_faces = store.count().await?, "face store ready");

    tracing::info!(
        url = %config.analyzer.url,
        model = %config.analyzer.model,
        detector = %config.analyzer.detector_backend,
        "using inference service"
    );
    let analyzer = RemoteAnalyzer::new(config.analyzer.clone());
    let engine = Arc::new(Engine::new(analyzer, store, matcher));
    let app = routes::router(engine, &config.analyzer.model, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "lookalike-server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("lookalike-server shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
    }
}
