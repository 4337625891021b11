//! Run manifests - the addressable record of one backup run.
//!
//! A manifest is created empty, populated incrementally as each resource
//! completes, and is terminal once every resource has been attempted. The
//! orchestrator exclusively owns the in-flight manifest; the persisted JSON
//! (`manifest.json` in the run directory, `{run_id}/manifest.json` in the
//! store) is read-only.

use crate::adapter::{Artifact, BackendKind, Resource};
use crate::error::{BackupError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Timestamp identifier for one backup invocation, e.g. `20260826T142501Z`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    const FORMAT: &'static str = "%Y%m%dT%H%M%SZ";

    pub fn now() -> Self {
        Self(Utc::now().format(Self::FORMAT).to_string())
    }

    /// Parse a user-supplied run id, rejecting anything that is not a
    /// timestamp in the manifest naming scheme.
    pub fn parse(s: &str) -> Result<Self> {
        chrono::NaiveDateTime::parse_from_str(s, Self::FORMAT)
            .map_err(|_| BackupError::Config(format!("invalid run id '{s}'")))?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Success,
    Failed,
}

/// Outcome of one resource's dump or restore attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResult {
    pub resource: Resource,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceResult {
    pub fn success(resource: Resource, artifact: Artifact) -> Self {
        Self {
            resource,
            status: ResourceStatus::Success,
            artifact: Some(artifact),
            error: None,
        }
    }

    pub fn failure(resource: Resource, error: &BackupError) -> Self {
        Self {
            resource,
            status: ResourceStatus::Failed,
            artifact: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResourceStatus::Success
    }
}

/// Record of one backup run, one entry per attempted resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub backend: BackendKind,
    pub entries: Vec<ResourceResult>,
}

impl RunManifest {
    pub fn new(run_id: RunId, backend: BackendKind) -> Self {
        Self {
            run_id,
            backend,
            entries: Vec::new(),
        }
    }

    /// Append one resource's outcome. Each resource is attempted at most
    /// once per run, so a second entry for the same id is a bug.
    pub fn record(&mut self, result: ResourceResult) {
        debug_assert!(
            self.entry_for(&result.resource.id).is_none(),
            "resource '{}' recorded twice in run {}",
            result.resource.id,
            self.run_id
        );
        self.entries.push(result);
    }

    pub fn entry_for(&self, resource_id: &str) -> Option<&ResourceResult> {
        self.entries.iter().find(|e| e.resource.id == resource_id)
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_success()).count()
    }

    /// A run succeeded overall only if no entry failed. Callers decide
    /// whether partial success is acceptable.
    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }

    /// Store key for the persisted manifest.
    pub fn store_key(&self) -> String {
        format!("{}/{}", self.run_id, MANIFEST_FILE_NAME)
    }

    pub async fn save(&self, run_dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(run_dir.join(MANIFEST_FILE_NAME), json).await?;
        Ok(())
    }

    pub async fn load(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(MANIFEST_FILE_NAME);
        if !tokio::fs::try_exists(&path).await? {
            return Err(BackupError::ArtifactNotFound(path.display().to_string()));
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Record of one restore run. Shares the per-resource result shape with
/// backup manifests but is not addressable by run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub backend: BackendKind,
    pub entries: Vec<ResourceResult>,
}

impl RestoreReport {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, result: ResourceResult) {
        self.entries.push(result);
    }

    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_success()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }
}
