//! Silver transform: raw CSV object in, refined Parquet object out.

pub mod cast;
pub mod complete;
pub mod encode;
pub mod filter;
pub mod normalize;
pub mod parse;

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::Local;
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{Result, StorageError};
use crate::fetch::{keys, keys::RawKeyTemplate, IngestReceipt};
use crate::storage::{StagedLocation, StorageProvider};
use complete::CompletionSignal;
use encode::PARQUET_CONTENT_TYPE;

/// Which raw object a transform run reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSelector {
    Key(String),
    /// Greatest key starting with `prefix`; timestamped names sort by time.
    Latest { prefix: String },
}

impl SourceSelector {
    /// The fixed key, or the newest timestamped object for a prefix.
    pub fn from_config(config: &PipelineConfig) -> Self {
        match RawKeyTemplate::parse(&config.raw_key_or_prefix) {
            RawKeyTemplate::Fixed(key) => SourceSelector::Key(key),
            t @ RawKeyTemplate::Timestamped(_) => SourceSelector::Latest {
                prefix: t.listing_prefix(),
            },
        }
    }

    pub fn from_receipt(receipt: &IngestReceipt) -> Self {
        SourceSelector::Key(receipt.staged_location.key.clone())
    }

    pub async fn resolve(&self, raw: &StorageProvider) -> std::result::Result<String, StorageError> {
        match self {
            SourceSelector::Key(key) => Ok(key.clone()),
            SourceSelector::Latest { prefix } => raw
                .list_keys(prefix)
                .await?
                .into_iter()
                .filter(|k| k.ends_with(".csv"))
                .next_back()
                .ok_or_else(|| StorageError::NoRawObjects {
                    bucket: raw.bucket().to_string(),
                    prefix: prefix.clone(),
                }),
        }
    }
}

/// Result of a successful transform run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransformOutcome {
    pub source_location: StagedLocation,
    pub refined_location: StagedLocation,
    pub rows_written: usize,
    pub bytes_written: usize,
    /// Set when the refined object was written but the completion signal failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_error: Option<String>,
}

/// Parse, normalize, filter and cast one raw payload.
pub fn refine(payload: &[u8], config: &PipelineConfig) -> Result<RecordBatch> {
    let raw = parse::parse_csv(payload)?;
    let normalized = normalize::normalize_columns(&raw)?;
    let filtered = filter::drop_missing_values(&normalized, &config.value_column_name)?;
    let refined =
        cast::apply_schema_mapping(&filtered, &config.schema_mapping, config.unmapped_columns)?;
    info!(
        raw_rows = raw.num_rows(),
        refined_rows = refined.num_rows(),
        columns = refined.num_columns(),
        "refined batch"
    );
    Ok(refined)
}

/// Run the transform from `raw` into `refined`, then signal completion.
///
/// The refined object is only replaced once the whole batch has been cast and
/// encoded, and then via a temporary key, so a failed run leaves any previous
/// object at `config.refined_key` untouched. Once the rename succeeds the run
/// counts as done: a failing [`CompletionSignal`] is logged and reported in
/// [`TransformOutcome::completion_error`] instead of failing the run.
pub async fn transform<C: CompletionSignal>(
    raw: &StorageProvider,
    refined: &StorageProvider,
    source: &SourceSelector,
    config: &PipelineConfig,
    completion: &C,
) -> Result<TransformOutcome> {
    match transform_inner(raw, refined, source, config, completion).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            error!(error = %e, "transform failed");
            Err(e)
        }
    }
}

async fn transform_inner<C: CompletionSignal>(
    raw: &StorageProvider,
    refined: &StorageProvider,
    source: &SourceSelector,
    config: &PipelineConfig,
    completion: &C,
) -> Result<TransformOutcome> {
    let start = Instant::now();
    let execution_id = keys::execution_id(Local::now());

    let raw_key = source.resolve(raw).await?;
    let source_location = raw.location(&raw_key);
    info!(source = %source_location, "reading raw object");
    let payload = raw.get(&raw_key).await?;

    let batch = refine(&payload, config)?;
    let parquet = encode::write_parquet_to_memory(&batch)?;
    let bytes_written = parquet.len();

    write_atomically(refined, &config.refined_key, Bytes::from(parquet), &execution_id).await?;

    let mut outcome = TransformOutcome {
        source_location,
        refined_location: refined.location(&config.refined_key),
        rows_written: batch.num_rows(),
        bytes_written,
        completion_error: None,
    };
    info!(
        location = %outcome.refined_location,
        rows = outcome.rows_written,
        bytes = outcome.bytes_written,
        elapsed = ?start.elapsed(),
        "wrote refined object"
    );

    // The refined object is already in place; a failed commit cannot undo it.
    if let Err(e) = completion.commit(&outcome).await {
        error!(location = %outcome.refined_location, error = %e, "completion signal failed");
        outcome.completion_error = Some(e.to_string());
    }
    Ok(outcome)
}

/// Put to `<key>.tmp-<tag>` then rename onto `key`.
async fn write_atomically(
    store: &StorageProvider,
    key: &str,
    bytes: Bytes,
    tag: &str,
) -> std::result::Result<(), StorageError> {
    let temp_key = format!("{}.tmp-{}", key, tag);
    let written = match store.put(&temp_key, bytes, Some(PARQUET_CONTENT_TYPE)).await {
        Ok(()) => store.rename(&temp_key, key).await,
        Err(e) => Err(e),
    };
    if written.is_err() {
        if let Err(cleanup) = store.delete(&temp_key).await {
            if !cleanup.is_not_found() {
                warn!(key = %temp_key, error = %cleanup, "failed to remove temporary object");
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMapping, OutputType, UnmappedColumns};
    use crate::error::{CastError, PipelineError};
    use complete::LogCompletion;

    fn job() -> LogCompletion {
        LogCompletion {
            job_name: "cdc-nutrition-transform".into(),
        }
    }

    struct ReadOnlyMarker;

    impl CompletionSignal for ReadOnlyMarker {
        async fn commit(&self, _outcome: &TransformOutcome) -> Result<()> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "marker bucket is read-only",
            ))
            .into())
        }
    }

    const SOURCE_CSV: &[u8] = b"YearStart,LocationDesc,Data_Value,Question\n2020,Ohio,34.5,q\n";

    #[test]
    fn test_selector_from_config() {
        let mut config = PipelineConfig::default();
        assert_eq!(
            SourceSelector::from_config(&config),
            SourceSelector::Latest {
                prefix: "raw/cdc_nutrition_".into()
            }
        );
        config.raw_key_or_prefix = "raw/data.csv".into();
        assert_eq!(
            SourceSelector::from_config(&config),
            SourceSelector::Key("raw/data.csv".into())
        );
    }

    #[tokio::test]
    async fn test_latest_picks_newest_csv() {
        let raw = StorageProvider::in_memory("bronze");
        for key in [
            "raw/cdc_nutrition_20250101_000000.csv",
            "raw/cdc_nutrition_20250301_000000.csv",
            "raw/cdc_nutrition_20250201_000000.csv",
            "raw/cdc_nutrition_20250401_000000.csv.tmp",
        ] {
            raw.put(key, Bytes::new(), None).await.unwrap();
        }
        let selector = SourceSelector::Latest {
            prefix: "raw/cdc_nutrition_".into(),
        };
        assert_eq!(
            selector.resolve(&raw).await.unwrap(),
            "raw/cdc_nutrition_20250301_000000.csv"
        );
    }

    #[tokio::test]
    async fn test_latest_with_nothing_staged() {
        let raw = StorageProvider::in_memory("bronze");
        let selector = SourceSelector::Latest {
            prefix: "raw/cdc_nutrition_".into(),
        };
        assert!(matches!(
            selector.resolve(&raw).await,
            Err(StorageError::NoRawObjects { .. })
        ));
    }

    #[test]
    fn test_refine_without_mapping_keeps_normalized_columns() {
        let config = PipelineConfig {
            schema_mapping: vec![],
            ..Default::default()
        };
        let batch = refine(b"Year Start,Data_Value\n2020,34.5\n2021,\n", &config).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema().field(0).name(), "year_start");
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_objects() {
        let raw = StorageProvider::in_memory("bronze");
        let refined = StorageProvider::in_memory("silver");
        raw.put(
            "raw/data.csv",
            Bytes::from_static(b"YearStart,Data_Value\n2020,34.5\n"),
            None,
        )
        .await
        .unwrap();
        let config = PipelineConfig {
            schema_mapping: vec![ColumnMapping::new(
                "data_value",
                "obesity_rate",
                OutputType::Double,
            )],
            unmapped_columns: UnmappedColumns::Keep,
            ..Default::default()
        };

        let outcome = transform(
            &raw,
            &refined,
            &SourceSelector::Key("raw/data.csv".into()),
            &config,
            &job(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rows_written, 1);
        assert_eq!(
            refined.list_keys("refined/").await.unwrap(),
            vec!["refined/data.parquet"]
        );
    }

    #[tokio::test]
    async fn test_missing_raw_object_is_storage_error() {
        let raw = StorageProvider::in_memory("bronze");
        let refined = StorageProvider::in_memory("silver");
        let err = transform(
            &raw,
            &refined,
            &SourceSelector::Key("raw/data.csv".into()),
            &PipelineConfig::default(),
            &job(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_cast_failure_writes_nothing() {
        let raw = StorageProvider::in_memory("bronze");
        let refined = StorageProvider::in_memory("silver");
        raw.put(
            "raw/data.csv",
            Bytes::from_static(b"YearStart,LocationDesc,Data_Value,Question\nabc,Ohio,34.5,q\n"),
            None,
        )
        .await
        .unwrap();

        let err = transform(
            &raw,
            &refined,
            &SourceSelector::Key("raw/data.csv".into()),
            &PipelineConfig::default(),
            &job(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Cast(CastError::InvalidValue { row: 0, .. })
        ));
        assert!(refined.list_keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_completion_keeps_written_object() {
        let raw = StorageProvider::in_memory("bronze");
        let refined = StorageProvider::in_memory("silver");
        raw.put("raw/data.csv", Bytes::from_static(SOURCE_CSV), None)
            .await
            .unwrap();
        refined
            .put("refined/data.parquet", Bytes::from_static(b"OLD"), None)
            .await
            .unwrap();

        let outcome = transform(
            &raw,
            &refined,
            &SourceSelector::Key("raw/data.csv".into()),
            &PipelineConfig::default(),
            &ReadOnlyMarker,
        )
        .await
        .unwrap();

        assert_eq!(outcome.rows_written, 1);
        assert!(outcome
            .completion_error
            .as_deref()
            .is_some_and(|e| e.contains("read-only")));
        let stored = refined.get("refined/data.parquet").await.unwrap();
        assert_ne!(stored, "OLD");
        assert_eq!(encode::read_parquet(stored).unwrap()[0].num_rows(), 1);
        assert_eq!(
            refined.list_keys("refined/").await.unwrap(),
            vec!["refined/data.parquet"]
        );
    }

    #[tokio::test]
    async fn test_failure_before_rename_keeps_previous_object() {
        let raw = StorageProvider::in_memory("bronze");
        let refined = StorageProvider::in_memory("silver");
        raw.put(
            "raw/data.csv",
            Bytes::from_static(b"YearStart,LocationDesc,Data_Value,Question\n2020,Ohio,n/a,q\n"),
            None,
        )
        .await
        .unwrap();
        refined
            .put("refined/data.parquet", Bytes::from_static(b"OLD"), None)
            .await
            .unwrap();

        let err = transform(
            &raw,
            &refined,
            &SourceSelector::Key("raw/data.csv".into()),
            &PipelineConfig::default(),
            &ReadOnlyMarker,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Cast(CastError::InvalidValue { .. })));
        assert_eq!(refined.get("refined/data.parquet").await.unwrap(), "OLD");
    }

    #[test]
    fn test_outcome_json_omits_missing_completion_error() {
        let store = StorageProvider::in_memory("silver");
        let mut outcome = TransformOutcome {
            source_location: store.location("raw/data.csv"),
            refined_location: store.location("refined/data.parquet"),
            rows_written: 1,
            bytes_written: 10,
            completion_error: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("completion_error").is_none());

        outcome.completion_error = Some("boom".into());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["completion_error"], "boom");
    }
}
