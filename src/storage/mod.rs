//! Bucket-scoped object storage.
//!
//! A [`StorageProvider`] is built per invocation and handed to the ingest and
//! transform entry points. The only process-global state is the set of
//! buckets behind [`StorageBackend::Memory`].

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem,
    memory::InMemory, path::Path, Attribute, AttributeValue, Attributes, ObjectStore, PutOptions,
    PutPayload,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, LazyLock, Mutex},
};
use tracing::debug;

use crate::error::StorageError;

/// Which object store the buckets live in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3, credentials and region from the environment.
    S3,
    /// Google Cloud Storage, credentials from the environment.
    Gcs,
    /// A directory per bucket under `root`.
    Local { root: PathBuf },
    /// Process-local buckets that vanish on exit; for tests and dry runs.
    Memory,
}

/// Buckets of [`StorageBackend::Memory`], keyed by name.
static MEMORY_BUCKETS: LazyLock<Mutex<HashMap<String, Arc<InMemory>>>> =
    LazyLock::new(Default::default);

fn memory_bucket(bucket: &str) -> Arc<InMemory> {
    let mut buckets = MEMORY_BUCKETS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    buckets
        .entry(bucket.to_string())
        .or_insert_with(|| Arc::new(InMemory::new()))
        .clone()
}

/// Where a staged object lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedLocation {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for StagedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Whole-object access to a single bucket.
#[derive(Clone)]
pub struct StorageProvider {
    bucket: String,
    scheme: &'static str,
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageProvider<{}://{}>", self.scheme, self.bucket)
    }
}

impl StorageProvider {
    /// Open `bucket` on the configured backend.
    pub fn for_bucket(backend: &StorageBackend, bucket: &str) -> Result<Self, StorageError> {
        let provider = match backend {
            StorageBackend::S3 => {
                let store = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|source| StorageError::Backend {
                        backend: "s3",
                        source,
                    })?;
                Self::with_store(bucket, "s3", Arc::new(store))
            }
            StorageBackend::Gcs => {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|source| StorageError::Backend {
                        backend: "gcs",
                        source,
                    })?;
                Self::with_store(bucket, "gs", Arc::new(store))
            }
            StorageBackend::Local { root } => {
                let dir = root.join(bucket);
                std::fs::create_dir_all(&dir)?;
                let store = LocalFileSystem::new_with_prefix(&dir).map_err(|source| {
                    StorageError::Backend {
                        backend: "local",
                        source,
                    }
                })?;
                Self::with_store(bucket, "file", Arc::new(store))
            }
            StorageBackend::Memory => Self::with_store(bucket, "memory", memory_bucket(bucket)),
        };
        debug!(?provider, "opened bucket");
        Ok(provider)
    }

    /// A fresh in-memory bucket, private to the returned provider and its clones.
    pub fn in_memory(bucket: &str) -> Self {
        Self::with_store(bucket, "memory", Arc::new(InMemory::new()))
    }

    pub fn with_store(bucket: &str, scheme: &'static str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.to_string(),
            scheme,
            store,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn location(&self, key: &str) -> StagedLocation {
        StagedLocation {
            scheme: self.scheme.to_string(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    fn path(&self, key: &str) -> Result<Path, StorageError> {
        Path::parse(key).map_err(|source| StorageError::InvalidKey {
            key: key.to_string(),
            source,
        })
    }

    fn store_error(&self, op: &'static str, key: &str, source: object_store::Error) -> StorageError {
        StorageError::ObjectStore {
            op,
            location: self.location(key).to_string(),
            source,
        }
    }

    /// Read a whole object.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| self.store_error("get", key, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| self.store_error("get", key, e))?;
        debug!(bucket = %self.bucket, key, bytes = bytes.len(), "get");
        Ok(bytes)
    }

    /// Write a whole object, replacing whatever was there.
    ///
    /// The content type is skipped on the local filesystem, which cannot store attributes.
    pub async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: Option<&'static str>,
    ) -> Result<(), StorageError> {
        let path = self.path(key)?;
        let len = bytes.len();
        let opts = match content_type {
            Some(ct) if self.scheme != "file" => PutOptions {
                attributes: Attributes::from_iter([(
                    Attribute::ContentType,
                    AttributeValue::from(ct),
                )]),
                ..Default::default()
            },
            _ => PutOptions::default(),
        };
        self.store
            .put_opts(&path, PutPayload::from(bytes), opts)
            .await
            .map_err(|e| self.store_error("put", key, e))?;
        debug!(bucket = %self.bucket, key, bytes = len, "put");
        Ok(())
    }

    /// Move `from` onto `to`, overwriting `to`.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let (src, dst) = (self.path(from)?, self.path(to)?);
        self.store
            .rename(&src, &dst)
            .await
            .map_err(|e| self.store_error("rename", from, e))?;
        debug!(bucket = %self.bucket, from, to, "rename");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| self.store_error("delete", key, e))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(self.store_error("head", key, e)),
        }
    }

    /// Keys beginning with `prefix`, sorted ascending.
    ///
    /// `prefix` is a plain string prefix: `raw/cdc_` matches `raw/cdc_1.csv`.
    /// Listing itself is done on the enclosing directory since object store
    /// prefixes are segment-based.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => Some(self.path(dir)?),
            _ => None,
        };
        let metas: Vec<_> = self
            .store
            .list(dir.as_ref())
            .try_collect()
            .await
            .map_err(|e| self.store_error("list", prefix, e))?;

        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|m| m.location.to_string())
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
