//! Object storage interface for array stores (local, S3/MinIO, in-memory).

use std::sync::Arc;

use bytes::Bytes;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
    PutMode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use era5_common::{ConversionError, ConversionResult};

/// Where store objects live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// A directory on the local filesystem.
    Local { path: String },
    /// An S3-compatible bucket.
    S3 {
        endpoint: String,
        bucket: String,
        access_key_id: String,
        secret_access_key: String,
        region: String,
        #[serde(default)]
        allow_http: bool,
    },
    /// Process-local memory, for tests and dry runs.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            path: "./stores".to_string(),
        }
    }
}

impl StorageConfig {
    /// Build from environment variables.
    ///
    /// `S3_BUCKET` selects the S3 backend (with `S3_ENDPOINT`,
    /// `S3_ACCESS_KEY`, `S3_SECRET_KEY`, `S3_REGION`, `S3_ALLOW_HTTP`);
    /// otherwise `STORE_ROOT` selects a local directory.
    pub fn from_env() -> Option<Self> {
        if let Ok(bucket) = std::env::var("S3_BUCKET") {
            return Some(Self::S3 {
                endpoint: std::env::var("S3_ENDPOINT")
                    .unwrap_or_else(|_| "http://minio:9000".to_string()),
                bucket,
                access_key_id: std::env::var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_access_key: std::env::var("S3_SECRET_KEY").unwrap_or_default(),
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                allow_http: std::env::var("S3_ALLOW_HTTP")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            });
        }
        std::env::var("STORE_ROOT")
            .ok()
            .map(|path| Self::Local { path })
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Local { path } => format!("file://{}", path),
            Self::S3 { bucket, .. } => format!("s3://{}", bucket),
            Self::Memory => "memory://".to_string(),
        }
    }
}

/// Outcome of a create-if-absent put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// An object already exists; its current content is returned.
    Exists(Bytes),
}

/// Object storage client for array stores.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectStorage {
    /// Create a storage client from config.
    pub fn new(config: &StorageConfig) -> ConversionResult<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StorageConfig::Local { path } => {
                std::fs::create_dir_all(path)?;
                Arc::new(LocalFileSystem::new_with_prefix(path).map_err(|e| {
                    ConversionError::storage(format!("failed to open {}: {}", path, e))
                })?)
            }
            StorageConfig::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_bucket_name(bucket)
                    .with_access_key_id(access_key_id)
                    .with_secret_access_key(secret_access_key)
                    .with_region(region);
                if *allow_http {
                    builder = builder.with_allow_http(true);
                }
                Arc::new(builder.build().map_err(|e| {
                    ConversionError::storage(format!("failed to create S3 client: {}", e))
                })?)
            }
            StorageConfig::Memory => Arc::new(InMemory::new()),
        };

        Ok(Self {
            store,
            label: config.describe(),
        })
    }

    /// In-memory storage.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            label: "memory://".to_string(),
        }
    }

    /// Wrap an existing object store.
    pub fn from_store(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write bytes to a path, replacing any existing object.
    #[instrument(skip(self, data), fields(storage = %self.label, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> ConversionResult<()> {
        let location = Path::from(path);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| ConversionError::storage(format!("failed to write {}: {}", path, e)))?;

        Ok(())
    }

    /// Write bytes only if no object exists at the path.
    ///
    /// Backends without conditional puts fall back to head-then-put, which
    /// is not atomic across concurrent writers.
    #[instrument(skip(self, data), fields(storage = %self.label, path = %path))]
    pub async fn put_if_absent(&self, path: &str, data: Bytes) -> ConversionResult<CreateOutcome> {
        let location = Path::from(path);

        match self
            .store
            .put_opts(&location, data.clone().into(), PutMode::Create.into())
            .await
        {
            Ok(_) => {
                debug!(size = data.len(), "Created object");
                Ok(CreateOutcome::Created)
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                Ok(CreateOutcome::Exists(self.get(path).await?))
            }
            Err(object_store::Error::NotImplemented) => {
                warn!("Conditional put unsupported, falling back to head + put");
                match self.get_opt(path).await? {
                    Some(existing) => Ok(CreateOutcome::Exists(existing)),
                    None => {
                        self.put(path, data).await?;
                        Ok(CreateOutcome::Created)
                    }
                }
            }
            Err(e) => Err(ConversionError::storage(format!(
                "failed to create {}: {}",
                path, e
            ))),
        }
    }

    /// Read bytes from a path.
    #[instrument(skip(self), fields(storage = %self.label, path = %path))]
    pub async fn get(&self, path: &str) -> ConversionResult<Bytes> {
        self.get_opt(path)
            .await?
            .ok_or_else(|| ConversionError::storage(format!("object not found: {}", path)))
    }

    /// Read bytes from a path, `None` if absent.
    pub async fn get_opt(&self, path: &str) -> ConversionResult<Option<Bytes>> {
        let location = Path::from(path);

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(ConversionError::storage(format!(
                    "failed to read {}: {}",
                    path, e
                )))
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| ConversionError::storage(format!("failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), path = %path, "Read object");
        Ok(Some(bytes))
    }

    /// Check if an object exists.
    pub async fn exists(&self, path: &str) -> ConversionResult<bool> {
        let location = Path::from(path);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(ConversionError::storage(format!(
                "failed to check {}: {}",
                path, e
            ))),
        }
    }

    /// List objects under a prefix as `(path, size)` pairs, sorted by path.
    pub async fn list(&self, prefix: &str) -> ConversionResult<Vec<(String, u64)>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let mut entries = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| ConversionError::storage(format!("list failed: {}", e)))?
        {
            entries.push((meta.location.to_string(), meta.size as u64));
        }

        entries.sort();
        Ok(entries)
    }

    /// Names of the immediate "directories" under a prefix.
    pub async fn list_dirs(&self, prefix: &str) -> ConversionResult<Vec<String>> {
        let prefix_path = Path::from(prefix);
        let result = self
            .store
            .list_with_delimiter(Some(&prefix_path))
            .await
            .map_err(|e| ConversionError::storage(format!("list failed: {}", e)))?;

        let mut dirs: Vec<String> = result
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Delete an object; a missing object is not an error.
    #[instrument(skip(self), fields(storage = %self.label, path = %path))]
    pub async fn delete(&self, path: &str) -> ConversionResult<()> {
        let location = Path::from(path);

        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                debug!("Deleted object");
                Ok(())
            }
            Err(e) => Err(ConversionError::storage(format!(
                "failed to delete {}: {}",
                path, e
            ))),
        }
    }
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("label", &self.label)
            .finish()
    }
}
