use bytes::Bytes;
use tracing::info;

use crate::error::Result;
use crate::process::TransformOutcome;
use crate::storage::StorageProvider;

pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Called once after the refined object is in place.
#[allow(async_fn_in_trait)]
pub trait CompletionSignal {
    async fn commit(&self, outcome: &TransformOutcome) -> Result<()>;
}

/// Logs the commit under the job name and nothing else.
#[derive(Clone, Debug)]
pub struct LogCompletion {
    pub job_name: String,
}

impl CompletionSignal for LogCompletion {
    async fn commit(&self, outcome: &TransformOutcome) -> Result<()> {
        info!(
            job = %self.job_name,
            location = %outcome.refined_location,
            rows = outcome.rows_written,
            "job committed"
        );
        Ok(())
    }
}

/// Writes an empty `_SUCCESS` object beside the refined key.
#[derive(Clone, Debug)]
pub struct SuccessMarker {
    pub storage: StorageProvider,
}

pub fn marker_key(refined_key: &str) -> String {
    match refined_key.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, SUCCESS_MARKER),
        None => SUCCESS_MARKER.to_string(),
    }
}

impl CompletionSignal for SuccessMarker {
    async fn commit(&self, outcome: &TransformOutcome) -> Result<()> {
        let key = marker_key(&outcome.refined_location.key);
        self.storage.put(&key, Bytes::new(), None).await?;
        info!(marker = %self.storage.location(&key), "wrote success marker");
        Ok(())
    }
}
