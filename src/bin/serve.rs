use anyhow::Result;
use cdcscraper::{
    fetch::{self, IngestReceipt},
    process::{self, complete::LogCompletion, SourceSelector, TransformOutcome},
    storage::StorageProvider,
    PipelineConfig, PipelineError,
};
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf, sync::Arc, time::Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};
use warp::{http::StatusCode, reject::Rejection, reply::Reply, Filter};

/// Named parameters of a transform job; all optional.
#[derive(Debug, Default, Deserialize)]
struct TransformRequest {
    job_name: Option<String>,
    raw_key: Option<String>,
    refined_key: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    details: Option<String>,
    processing_time_seconds: f64,
}

fn error_reply(
    stage: &str,
    e: &PipelineError,
    start: Instant,
) -> warp::reply::WithStatus<warp::reply::Json> {
    let elapsed = start.elapsed().as_secs_f64();
    warn!("❌ {} failed after {:.3}s: {}", stage, elapsed, e);
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error: format!("{} failed", stage),
            details: Some(e.to_string()),
            processing_time_seconds: elapsed,
        }),
        StatusCode::BAD_GATEWAY,
    )
}

async fn health_check() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "status": "healthy",
        "service": "cdc-nutrition-pipeline"
    })))
}

/// The event body is opaque; it is logged and otherwise ignored.
async fn handle_ingest(
    event: serde_json::Value,
    config: Arc<PipelineConfig>,
) -> Result<impl Reply, Rejection> {
    let start = Instant::now();
    info!(?event, "ingest triggered");

    Ok(match run_ingest(&config).await {
        Ok(receipt) => {
            info!(
                "✅ staged {} in {:.3}s",
                receipt.staged_location,
                start.elapsed().as_secs_f64()
            );
            warp::reply::with_status(warp::reply::json(&receipt), StatusCode::OK)
        }
        Err(e) => error_reply("ingest", &e, start),
    })
}

async fn handle_transform(
    req: TransformRequest,
    config: Arc<PipelineConfig>,
) -> Result<impl Reply, Rejection> {
    let start = Instant::now();
    let mut config = config.as_ref().clone();
    if let Some(key) = req.refined_key {
        config.refined_key = key;
    }
    let source = match req.raw_key {
        Some(key) => SourceSelector::Key(key),
        None => SourceSelector::from_config(&config),
    };
    let job = LogCompletion {
        job_name: req.job_name.unwrap_or_else(|| "cdc-nutrition-transform".to_string()),
    };
    info!(job = %job.job_name, ?source, "transform triggered");

    Ok(match run_transform(&config, &source, &job).await {
        Ok(outcome) => {
            info!(
                "✅ wrote {} rows to {} in {:.3}s",
                outcome.rows_written,
                outcome.refined_location,
                start.elapsed().as_secs_f64()
            );
            warp::reply::with_status(warp::reply::json(&outcome), StatusCode::OK)
        }
        Err(e) => error_reply("transform", &e, start),
    })
}

// Storage handles live for one request only
async fn run_ingest(config: &PipelineConfig) -> cdcscraper::Result<IngestReceipt> {
    let raw = StorageProvider::for_bucket(&config.storage, &config.raw_bucket)?;
    let client = fetch::http_client(config)?;
    fetch::ingest(&client, &raw, config).await
}

async fn run_transform(
    config: &PipelineConfig,
    source: &SourceSelector,
    job: &LogCompletion,
) -> cdcscraper::Result<TransformOutcome> {
    let raw = StorageProvider::for_bucket(&config.storage, &config.raw_bucket)?;
    let refined = StorageProvider::for_bucket(&config.storage, &config.refined_bucket)?;
    process::transform(&raw, &refined, source, config, job).await
}

fn routes(
    config: Arc<PipelineConfig>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_config = warp::any().map(move || config.clone());

    let health = warp::path("health").and(warp::get()).and_then(health_check);

    let ingest = warp::path("ingest")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_config.clone())
        .and_then(handle_ingest);

    let transform = warp::path("transform")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_config)
        .and_then(handle_transform);

    health.or(ingest).or(transform)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .init();

    let config_path = env::var("CDC_CONFIG").ok().map(PathBuf::from);
    let config = Arc::new(PipelineConfig::load(config_path.as_deref())?);

    // Get port from environment or default to 8080
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    info!("Server starting on port {}", port);
    info!("Health check: http://localhost:{}/health", port);
    info!("Ingest endpoint: POST http://localhost:{}/ingest", port);
    info!("Transform endpoint: POST http://localhost:{}/transform", port);

    warp::serve(routes(config)).run(([0, 0, 0, 0], port)).await;

    Ok(())
}
