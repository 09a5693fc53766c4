use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};
use tracing::debug;
use url::Url;

use crate::error::ConfigError;
use crate::storage::StorageBackend;

static DEFAULT_SOURCE_URL: &str = "https://data.cdc.gov/resource/hn4x-zwk7.csv";
static DEFAULT_RAW_BUCKET: &str = "cdc-nutrition-raw-bronze";
static DEFAULT_RAW_PREFIX: &str = "cdc_nutrition";
static DEFAULT_REFINED_BUCKET: &str = "cdc-nutrition-transformed-silver";
static DEFAULT_REFINED_KEY: &str = "refined/data.parquet";
static DEFAULT_VALUE_COLUMN: &str = "data_value";

/// Destination type of a mapped column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    String,
    Integer,
    Double,
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputType::String => "string",
            OutputType::Integer => "integer",
            OutputType::Double => "double",
        })
    }
}

/// One entry of the schema mapping: normalized source name → (output name, type).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub target_type: OutputType,
}

impl ColumnMapping {
    pub fn new(source: &str, target: &str, target_type: OutputType) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            target_type,
        }
    }
}

/// What happens to columns the schema mapping does not mention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedColumns {
    /// Strict mode: only mapped columns reach the output.
    #[default]
    Drop,
    /// Pass-through mode: unmapped columns are kept unchanged.
    Keep,
}

/// Everything one ingest/transform invocation needs to know.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source_url: String,
    /// Sent as `X-App-Token` when present.
    pub app_token: Option<String>,
    pub timeout_secs: u64,
    pub raw_bucket: String,
    /// `*.csv` is a fixed key; anything else is a prefix for timestamped keys.
    pub raw_key_or_prefix: String,
    pub refined_bucket: String,
    pub refined_key: String,
    pub value_column_name: String,
    pub schema_mapping: Vec<ColumnMapping>,
    pub unmapped_columns: UnmappedColumns,
    pub storage: StorageBackend,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            app_token: None,
            timeout_secs: 30,
            raw_bucket: DEFAULT_RAW_BUCKET.to_string(),
            raw_key_or_prefix: DEFAULT_RAW_PREFIX.to_string(),
            refined_bucket: DEFAULT_REFINED_BUCKET.to_string(),
            refined_key: DEFAULT_REFINED_KEY.to_string(),
            value_column_name: DEFAULT_VALUE_COLUMN.to_string(),
            schema_mapping: default_schema_mapping(),
            unmapped_columns: UnmappedColumns::Drop,
            storage: StorageBackend::S3,
        }
    }
}

/// The production mapping for the CDC obesity dataset.
pub fn default_schema_mapping() -> Vec<ColumnMapping> {
    vec![
        ColumnMapping::new("yearstart", "year", OutputType::Integer),
        ColumnMapping::new("locationdesc", "state", OutputType::String),
        ColumnMapping::new("data_value", "obesity_rate", OutputType::Double),
        ColumnMapping::new("question", "metric_type", OutputType::String),
    ]
}

impl PipelineConfig {
    /// Defaults, then the optional YAML file, then `CDC_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 6] = [
            ("CDC_SOURCE_URL", &mut self.source_url),
            ("CDC_RAW_BUCKET", &mut self.raw_bucket),
            ("CDC_RAW_KEY", &mut self.raw_key_or_prefix),
            ("CDC_REFINED_BUCKET", &mut self.refined_bucket),
            ("CDC_REFINED_KEY", &mut self.refined_key),
            ("CDC_VALUE_COLUMN", &mut self.value_column_name),
        ];
        for (name, slot) in fields {
            if let Some(v) = lookup(name) {
                *slot = v;
            }
        }
        if let Some(token) = lookup("CDC_APP_TOKEN") {
            self.app_token = Some(token);
        }
        if let Some(root) = lookup("CDC_STORAGE_ROOT") {
            self.storage = StorageBackend::Local { root: root.into() };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.source_url).map_err(|source| ConfigError::Url {
            url: self.source_url.clone(),
            source,
        })?;
        let required = [
            ("raw_bucket", &self.raw_bucket),
            ("raw_key_or_prefix", &self.raw_key_or_prefix),
            ("refined_bucket", &self.refined_bucket),
            ("refined_key", &self.refined_key),
            ("value_column_name", &self.value_column_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}
