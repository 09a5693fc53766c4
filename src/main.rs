use anyhow::{Context, Result};
use cdcscraper::{
    fetch::{self, IngestReceipt},
    process::{
        self,
        complete::{CompletionSignal, LogCompletion, SuccessMarker},
        SourceSelector,
    },
    storage::StorageProvider,
    PipelineConfig,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Bronze → silver pipeline for the CDC nutrition dataset.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// YAML config file; `CDC_*` environment variables override it
    #[arg(long, global = true, env = "CDC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the source CSV into the raw bucket and print the receipt
    Ingest,
    /// Turn a raw object into the refined Parquet object
    Transform(TransformArgs),
    /// Ingest, then transform the object just written
    Run(OutputArgs),
}

#[derive(Args, Debug)]
struct TransformArgs {
    /// Raw key to read instead of the configured/latest one
    #[arg(long)]
    raw_key: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Refined key to write instead of the configured one
    #[arg(long)]
    refined_key: Option<String>,

    #[arg(long, default_value = "cdc-nutrition-transform")]
    job_name: String,

    /// Also write a `_SUCCESS` marker next to the refined object
    #[arg(long)]
    success_marker: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();

    // ─── 2) load config ──────────────────────────────────────────────
    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("loading config")?;
    info!(
        raw_bucket = %config.raw_bucket,
        refined_bucket = %config.refined_bucket,
        storage = ?config.storage,
        "startup"
    );

    // ─── 3) dispatch ─────────────────────────────────────────────────
    match cli.command {
        Command::Ingest => {
            let receipt = ingest(&config).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Command::Transform(args) => {
            if let Some(key) = &args.output.refined_key {
                config.refined_key = key.clone();
            }
            let source = match &args.raw_key {
                Some(key) => SourceSelector::Key(key.clone()),
                None => SourceSelector::from_config(&config),
            };
            transform(&config, &source, &args.output).await?;
        }
        Command::Run(args) => {
            if let Some(key) = &args.refined_key {
                config.refined_key = key.clone();
            }
            let receipt = ingest(&config).await?;
            transform(&config, &SourceSelector::from_receipt(&receipt), &args).await?;
        }
    }

    info!("all done");
    Ok(())
}

async fn ingest(config: &PipelineConfig) -> Result<IngestReceipt> {
    let raw = StorageProvider::for_bucket(&config.storage, &config.raw_bucket)
        .context("opening raw bucket")?;
    let client = fetch::http_client(config)?;
    fetch::ingest(&client, &raw, config)
        .await
        .context("ingest failed")
}

async fn transform(
    config: &PipelineConfig,
    source: &SourceSelector,
    args: &OutputArgs,
) -> Result<()> {
    let raw = StorageProvider::for_bucket(&config.storage, &config.raw_bucket)
        .context("opening raw bucket")?;
    let refined = StorageProvider::for_bucket(&config.storage, &config.refined_bucket)
        .context("opening refined bucket")?;
    info!(job = %args.job_name, ?source, "transform starting");

    let outcome = if args.success_marker {
        let marker = SuccessMarker {
            storage: refined.clone(),
        };
        run_transform(&raw, &refined, source, config, &marker).await?
    } else {
        let job = LogCompletion {
            job_name: args.job_name.clone(),
        };
        run_transform(&raw, &refined, source, config, &job).await?
    };
    if let Some(e) = &outcome.completion_error {
        warn!(error = %e, "refined object written but completion signal failed");
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_transform<C: CompletionSignal>(
    raw: &StorageProvider,
    refined: &StorageProvider,
    source: &SourceSelector,
    config: &PipelineConfig,
    completion: &C,
) -> Result<process::TransformOutcome> {
    process::transform(raw, refined, source, config, completion)
        .await
        .context("transform failed")
}
