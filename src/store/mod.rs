//! Artifact store - an object-storage facade.
//!
//! Wraps the `object_store` crate so the rest of the tool only sees
//! put/get/list of named byte artifacts plus whole-directory transfer. Keys
//! are relative paths rooted at a run-scoped prefix (`{run_id}/{file}`), and
//! directory structure is preserved on transfer so a restore can reconstruct
//! the layout it uploaded.

use crate::config::{Credentials, S3Config};
use crate::error::{BackupError, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Object-storage facade. Cheap to clone.
#[derive(Clone)]
pub struct ArtifactStore {
    inner: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    /// S3-compatible store (AWS, MinIO, Ceph RGW). Credentials come from the
    /// validated config option set, never re-derived per call.
    pub fn s3(config: &S3Config) -> Result<Self> {
        config.validate()?;

        let endpoint = config.endpoint.trim_end_matches('/');
        let mut builder = match &config.credentials {
            Credentials::Explicit { access_key, secret_key } => AmazonS3Builder::new()
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key)
                .with_region("us-east-1"),
            Credentials::Environment => AmazonS3Builder::from_env(),
        };

        builder = builder
            .with_bucket_name(&config.bucket)
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));

        let store = builder
            .build()
            .map_err(|e| BackupError::Config(format!("invalid s3 configuration: {e}")))?;
        Ok(Self { inner: Arc::new(store) })
    }

    /// Store rooted at a local directory. Used for tests and offline runs.
    pub fn local(root: &Path) -> Result<Self> {
        let store = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| BackupError::Config(format!("invalid store root: {e}")))?;
        Ok(Self { inner: Arc::new(store) })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<()> {
        let location = parse_key(key)?;
        self.inner.put(&location, bytes.into()).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let location = parse_key(key)?;
        let result = self.inner.get(&location).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                BackupError::ArtifactNotFound(key.to_string())
            }
            other => BackupError::Store(other),
        })?;
        Ok(result.bytes().await?)
    }

    /// List object keys under a prefix. Only plain objects are returned;
    /// directory markers never appear.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = parse_key(prefix)?;
        let mut stream = self.inner.list(Some(&prefix));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            keys.push(meta?.location.to_string());
        }
        keys.sort();
        Ok(keys)
    }

    /// Upload every plain file under `dir`, keyed as `{prefix}/{relative}`.
    ///
    /// A failure uploading one object does not prevent attempting the rest;
    /// the keys that failed are returned for the caller to report.
    pub async fn upload_dir(&self, dir: &Path, prefix: &str) -> Result<Vec<String>> {
        let mut failed = Vec::new();

        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| BackupError::Io(std::io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let key = format!("{prefix}/{relative}");

            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    warn!("Failed to read {} for upload: {}", entry.path().display(), e);
                    failed.push(key);
                    continue;
                }
            };

            debug!("Uploading {} ({} bytes)", key, bytes.len());
            if let Err(e) = self.put(&key, bytes).await {
                warn!("Failed to upload {}: {}", key, e);
                failed.push(key);
            }
        }

        Ok(failed)
    }

    /// Download every object under `prefix` into `dir`, reproducing the
    /// relative layout. Returns the keys that failed to transfer.
    pub async fn download_prefix(&self, prefix: &str, dir: &Path) -> Result<Vec<String>> {
        let keys = self.list(prefix).await?;
        let mut failed = Vec::new();

        for key in keys {
            let relative = key.strip_prefix(prefix).unwrap_or(&key).trim_start_matches('/');
            let target = dir.join(relative);

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            debug!("Downloading {} to {}", key, target.display());
            match self.get(&key).await {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::write(&target, &bytes).await {
                        warn!("Failed to write {}: {}", target.display(), e);
                        failed.push(key);
                    }
                }
                Err(e) => {
                    warn!("Failed to download {}: {}", key, e);
                    failed.push(key);
                }
            }
        }

        Ok(failed)
    }
}

fn parse_key(key: &str) -> Result<StorePath> {
    StorePath::parse(key).map_err(|e| BackupError::Config(format!("invalid store key '{key}': {e}")))
}
