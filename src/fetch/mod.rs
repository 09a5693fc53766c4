//! Bronze ingest: fetch the source CSV and stage it verbatim.

pub mod keys;

use bytes::Bytes;
use chrono::Local;
use reqwest::Client;
use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::{FetchError, Result};
use crate::storage::{StagedLocation, StorageProvider};
use keys::RawKeyTemplate;

/// Socrata header carrying an application token.
pub const APP_TOKEN_HEADER: &str = "X-App-Token";

/// What a successful ingest hands to the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "execution_date")]
    pub execution_id: String,
    #[serde(rename = "s3_path", serialize_with = "as_uri")]
    pub staged_location: StagedLocation,
    pub file_name: String,
}

fn as_uri<S: Serializer>(location: &StagedLocation, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(location)
}

/// HTTP client with the configured request timeout.
pub fn http_client(config: &PipelineConfig) -> std::result::Result<Client, FetchError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|source| FetchError::Transport {
            url: config.source_url.clone(),
            source,
        })
}

/// Single GET of `url`; any non-success status is an error.
pub async fn fetch_csv(
    client: &Client,
    url: &str,
    app_token: Option<&str>,
) -> std::result::Result<(u16, Bytes), FetchError> {
    let transport = |source: reqwest::Error| FetchError::Transport {
        url: url.to_string(),
        source,
    };

    let mut request = client.get(url);
    if let Some(token) = app_token {
        request = request.header(APP_TOKEN_HEADER, token);
    }
    let resp = request.send().await.map_err(transport)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let body = resp.bytes().await.map_err(transport)?;
    Ok((status.as_u16(), body))
}

/// Fetch the dataset and write it to the raw bucket.
///
/// Failures are logged and returned untouched; nothing is written unless the
/// fetch succeeded.
pub async fn ingest(
    client: &Client,
    raw: &StorageProvider,
    config: &PipelineConfig,
) -> Result<IngestReceipt> {
    match ingest_inner(client, raw, config).await {
        Ok(receipt) => Ok(receipt),
        Err(e) => {
            error!(url = %config.source_url, error = %e, "ingest failed");
            Err(e)
        }
    }
}

async fn ingest_inner(
    client: &Client,
    raw: &StorageProvider,
    config: &PipelineConfig,
) -> Result<IngestReceipt> {
    let execution_id = keys::execution_id(Local::now());
    let key = RawKeyTemplate::parse(&config.raw_key_or_prefix).key_for(&execution_id);

    info!(url = %config.source_url, "requesting dataset");
    let start = Instant::now();
    let (status_code, body) =
        fetch_csv(client, &config.source_url, config.app_token.as_deref()).await?;
    info!(status = status_code, bytes = body.len(), elapsed = ?start.elapsed(), "fetched");

    raw.put(&key, body, Some("text/csv")).await?;
    let staged_location = raw.location(&key);
    info!(location = %staged_location, "staged raw object");

    Ok(IngestReceipt {
        status_code,
        file_name: keys::file_name(&key).to_string(),
        execution_id,
        staged_location,
    })
}
