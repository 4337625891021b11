//! The uniform backend adapter contract.
//!
//! Each backend (Postgres, Elasticsearch, GRIP) implements [`ResourceAdapter`]:
//! enumerate its backup-able resources, produce one point-in-time artifact per
//! resource, and replay an artifact back into the backend. The orchestrator is
//! written once against this trait and never inspects backend types at
//! runtime.

pub mod elastic;
pub mod grip;
pub mod postgres;

use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which backend a resource or run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Elasticsearch,
    Grip,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Elasticsearch => write!(f, "elasticsearch"),
            BackendKind::Grip => write!(f, "grip"),
        }
    }
}

/// One backup-able unit inside a backend: a database, an index, or a graph.
///
/// The schema-graph companion is a declared attribute of the resource, so the
/// orchestrator can reason about it without string matching on names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub has_schema_companion: bool,
}

impl Resource {
    pub fn new(id: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            kind,
            has_schema_companion: false,
        }
    }

    pub fn with_schema_companion(mut self) -> Self {
        self.has_schema_companion = true;
        self
    }
}

/// Where an artifact's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLocation {
    /// Local files, named relative to the run directory.
    Files(Vec<String>),
    /// A snapshot held backend-side in a registered repository.
    Snapshot { repository: String, snapshot: String },
}

/// Metadata for one resource's point-in-time artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub resource_id: String,
    pub backend: BackendKind,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// SHA-256 over the artifact files, in write order. Snapshot artifacts
    /// have no local bytes to digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    pub location: ArtifactLocation,
}

impl Artifact {
    /// Build the metadata record for an artifact made of local files under
    /// `run_dir`. Digests and sizes are read back from disk.
    pub async fn from_files(
        resource: &Resource,
        run_dir: &Path,
        file_names: Vec<String>,
    ) -> Result<Self> {
        let paths: Vec<PathBuf> = file_names.iter().map(|n| run_dir.join(n)).collect();

        let mut size_bytes = 0u64;
        for path in &paths {
            size_bytes += tokio::fs::metadata(path).await?.len();
        }
        let digest = sha256_of_files(paths).await?;

        Ok(Self {
            resource_id: resource.id.clone(),
            backend: resource.kind,
            created_at: Utc::now(),
            size_bytes,
            content_digest: Some(digest),
            location: ArtifactLocation::Files(file_names),
        })
    }
}

/// How a backend's dump/restore calls are grouped within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpGranularity {
    /// One backend call per resource (default).
    PerResource,
    /// One backend call covering every resource of the run. Trades
    /// per-resource failure reporting for an atomic point-in-time image.
    WholeRun,
}

/// Uniform contract over heterogeneous backends.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Enumerate resources in backend-native order. The order is stable for
    /// the duration of a run but not across backend versions.
    async fn list_resources(&self) -> Result<Vec<Resource>>;

    /// Write one resource's artifact into `run_dir` and return its metadata.
    async fn dump_resource(&self, resource: &Resource, run_dir: &Path) -> Result<Artifact>;

    /// Replay one resource's artifact back into the backend.
    async fn restore_resource(
        &self,
        resource: &Resource,
        location: &ArtifactLocation,
        dir: &Path,
    ) -> Result<()>;

    /// Artifact file names expected for a resource, used to match resources
    /// against a plain artifact directory. Empty for backends whose
    /// artifacts live backend-side.
    fn expected_files(&self, resource: &Resource) -> Vec<String>;

    fn granularity(&self) -> DumpGranularity {
        DumpGranularity::PerResource
    }

    /// Dump every resource of the run in one backend call. Only meaningful
    /// for [`DumpGranularity::WholeRun`] backends.
    async fn dump_run(
        &self,
        _resources: &[Resource],
        _run_dir: &Path,
        _run_id: &str,
    ) -> Result<Vec<Artifact>> {
        Err(BackupError::Config(
            "backend does not support whole-run dumps".into(),
        ))
    }

    /// Restore every resource of the run from one backend-side snapshot.
    async fn restore_run(&self, _resources: &[Resource], _snapshot: &str) -> Result<()> {
        Err(BackupError::Config(
            "backend does not support whole-run restores".into(),
        ))
    }

    /// Derive the resource list recorded in a backend-side snapshot.
    async fn resolve_snapshot(&self, _snapshot: &str) -> Result<Vec<Resource>> {
        Err(BackupError::Config(
            "backend does not support snapshot resolution".into(),
        ))
    }
}

/// SHA-256 over the given files, concatenated in order, as lowercase hex.
pub(crate) async fn sha256_of_files(paths: Vec<PathBuf>) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut hasher = Sha256::new();
        for path in &paths {
            let mut file = std::fs::File::open(path)?;
            std::io::copy(&mut file, &mut hasher)?;
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| BackupError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn artifact_from_files_records_size_and_digest() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("db1.dump"), b"dump bytes")
            .await
            .unwrap();

        let resource = Resource::new("db1", BackendKind::Postgres);
        let artifact = Artifact::from_files(&resource, dir.path(), vec!["db1.dump".into()])
            .await
            .unwrap();

        assert_eq!(artifact.resource_id, "db1");
        assert_eq!(artifact.size_bytes, 10);
        assert!(artifact.content_digest.is_some());
        assert_eq!(
            artifact.location,
            ArtifactLocation::Files(vec!["db1.dump".into()])
        );
    }

    #[tokio::test]
    async fn digest_covers_files_in_order() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a"), b"first").await.unwrap();
        tokio::fs::write(dir.path().join("b"), b"second").await.unwrap();

        let forward =
            sha256_of_files(vec![dir.path().join("a"), dir.path().join("b")]).await.unwrap();
        let reverse =
            sha256_of_files(vec![dir.path().join("b"), dir.path().join("a")]).await.unwrap();
        assert_ne!(forward, reverse);
    }

    #[test]
    fn schema_companion_is_declared_not_derived() {
        let plain = Resource::new("CALYPR", BackendKind::Grip);
        assert!(!plain.has_schema_companion);

        let with_schema = Resource::new("CALYPR", BackendKind::Grip).with_schema_companion();
        assert!(with_schema.has_schema_companion);
        // The identity stays the graph name; no suffix convention involved.
        assert_eq!(with_schema.id, "CALYPR");
    }
}
