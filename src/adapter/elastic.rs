//! Elasticsearch adapter - drives the cluster's snapshot API over HTTP.
//!
//! Artifacts are Elasticsearch snapshots held in a registered repository, not
//! local files. Snapshot and restore calls accept a set of indices in one
//! request, so this adapter runs at whole-run granularity: one snapshot per
//! backup run covering every index, which trades fine-grained failure
//! reporting for atomicity of the point-in-time image.

use crate::adapter::{
    Artifact, ArtifactLocation, BackendKind, DumpGranularity, Resource, ResourceAdapter,
};
use crate::config::ElasticConfig;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Internal index that 400s when included in a snapshot.
const EXCLUDED_INDICES: &[&str] = &[".geoip_databases"];

const SNAPSHOT_STATE_SUCCESS: &str = "SUCCESS";

pub struct ElasticAdapter {
    config: ElasticConfig,
    client: Client,
    base_url: String,
}

impl ElasticAdapter {
    pub fn new(config: ElasticConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url();
        Ok(Self {
            config,
            client: Client::new(),
            base_url,
        })
    }

    /// Register the snapshot repository, pointing it at the configured
    /// bucket. Registering an already-registered repository is success, not
    /// an error.
    pub async fn init_repository(&self) -> Result<()> {
        self.config.validate_repository()?;

        if self.repository_exists().await? {
            info!("Repository '{}' already exists", self.config.repository);
            return Ok(());
        }

        let mut settings = json!({
            "bucket": self.config.bucket,
            "base_path": self.config.repository,
        });
        if let Some(endpoint) = &self.config.endpoint {
            settings["endpoint"] = json!(endpoint);
        }

        let url = format!("{}/_snapshot/{}", self.base_url, self.config.repository);
        let response = self
            .client
            .put(&url)
            .json(&json!({ "type": "s3", "settings": settings }))
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if !response.status().is_success() {
            return Err(self.status_error("register repository", response).await);
        }

        info!("Repository '{}' created", self.config.repository);
        Ok(())
    }

    /// Delete the snapshot repository. Destroys the addressability of every
    /// snapshot under it, so an explicit confirmation flag is required.
    pub async fn delete_repository(&self, force: bool) -> Result<()> {
        self.config.validate_repository()?;

        if !force {
            return Err(BackupError::Config(
                "repository deletion requires --force".into(),
            ));
        }

        let url = format!("{}/_snapshot/{}", self.base_url, self.config.repository);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if !response.status().is_success() {
            return Err(self.status_error("delete repository", response).await);
        }

        info!("Repository '{}' deleted", self.config.repository);
        Ok(())
    }

    /// All registered snapshot repositories.
    pub async fn repositories(&self) -> Result<Vec<String>> {
        let url = format!("{}/_snapshot/_all", self.base_url);
        let body: Value = self.get_json(&url).await?;
        let mut names: Vec<String> = body
            .as_object()
            .map(|repos| repos.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    /// All snapshots in the configured repository.
    pub async fn snapshots(&self) -> Result<Vec<String>> {
        self.config.validate_repository()?;
        let url = format!(
            "{}/_snapshot/{}/_all",
            self.base_url, self.config.repository
        );
        let body: Value = self.get_json(&url).await?;
        let names = body["snapshots"]
            .as_array()
            .map(|snapshots| {
                snapshots
                    .iter()
                    .filter_map(|s| s["snapshot"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    /// The indices recorded in one snapshot.
    pub async fn snapshot_indices(&self, snapshot: &str) -> Result<Vec<String>> {
        let body = self.get_snapshot(snapshot).await?;
        let indices = body["snapshots"][0]["indices"]
            .as_array()
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(indices)
    }

    async fn repository_exists(&self) -> Result<bool> {
        let url = format!("{}/_snapshot/{}", self.base_url, self.config.repository);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(self.status_error("check repository", response).await),
        }
    }

    /// Fetch a snapshot's metadata, mapping absence to `ArtifactNotFound`.
    async fn get_snapshot(&self, snapshot: &str) -> Result<Value> {
        self.config.validate_repository()?;
        let url = format!(
            "{}/_snapshot/{}/{}",
            self.base_url, self.config.repository, snapshot
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackupError::ArtifactNotFound(format!(
                "snapshot '{}' in repository '{}'",
                snapshot, self.config.repository
            )));
        }
        if !response.status().is_success() {
            return Err(self.status_error("get snapshot", response).await);
        }

        let body: Value = response.json().await?;
        if body["snapshots"].as_array().is_none_or(|s| s.is_empty()) {
            return Err(BackupError::ArtifactNotFound(format!(
                "snapshot '{}' in repository '{}'",
                snapshot, self.config.repository
            )));
        }
        Ok(body)
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let url = format!("{}/{}", self.base_url, index);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;
        Ok(response.status().is_success())
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        debug!("Creating missing index '{}' as a restore target", index);
        let url = format!("{}/{}", self.base_url, index);
        let response = self
            .client
            .put(&url)
            .json(&json!({}))
            .send()
            .await
            .map_err(BackupError::from_http)?;
        if !response.status().is_success() {
            return Err(self.status_error("create index", response).await);
        }
        Ok(())
    }

    /// Close an open index before overwriting it. Live traffic to the index
    /// is lost for the restore's duration; that is the documented cost of
    /// restoring over an open index.
    async fn close_index(&self, index: &str) -> Result<()> {
        debug!("Closing index '{}' before restore", index);
        let url = format!("{}/{}/_close", self.base_url, index);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;
        if !response.status().is_success() {
            return Err(self.status_error("close index", response).await);
        }
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(BackupError::from_http)?;
        if !response.status().is_success() {
            return Err(self.status_error("request", response).await);
        }
        Ok(response.json().await?)
    }

    async fn status_error(&self, action: &str, response: reqwest::Response) -> BackupError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_status(action, status, &body)
    }
}

#[async_trait]
impl ResourceAdapter for ElasticAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Elasticsearch
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let url = format!("{}/_cat/indices?h=index", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BackupError::from_http)?;
        if !response.status().is_success() {
            return Err(self.status_error("list indices", response).await);
        }

        let text = response.text().await?;
        Ok(parse_index_listing(&text))
    }

    async fn dump_resource(&self, resource: &Resource, run_dir: &Path) -> Result<Artifact> {
        let run_id = crate::manifest::RunId::now();
        let mut artifacts = self
            .dump_run(std::slice::from_ref(resource), run_dir, run_id.as_str())
            .await?;
        Ok(artifacts.remove(0))
    }

    async fn restore_resource(
        &self,
        resource: &Resource,
        location: &ArtifactLocation,
        _dir: &Path,
    ) -> Result<()> {
        match location {
            ArtifactLocation::Snapshot { snapshot, .. } => {
                self.restore_run(std::slice::from_ref(resource), snapshot).await
            }
            ArtifactLocation::Files(_) => Err(BackupError::RestoreFailed {
                resource: resource.id.clone(),
                cause: "elasticsearch artifacts are snapshots, not local files".into(),
            }),
        }
    }

    fn expected_files(&self, _resource: &Resource) -> Vec<String> {
        // Snapshots live backend-side; there is nothing to match on disk.
        Vec::new()
    }

    fn granularity(&self) -> DumpGranularity {
        DumpGranularity::WholeRun
    }

    async fn dump_run(
        &self,
        resources: &[Resource],
        _run_dir: &Path,
        run_id: &str,
    ) -> Result<Vec<Artifact>> {
        self.config.validate_repository()?;

        if !self.repository_exists().await? {
            return Err(BackupError::Config(format!(
                "snapshot repository '{}' is not registered; run `es repo init` first",
                self.config.repository
            )));
        }

        for resource in resources {
            if !self.index_exists(&resource.id).await? {
                // The snapshot call may no-op for it, but that is the
                // backend's decision to make.
                warn!("Index '{}' not found, attempting snapshot anyway", resource.id);
            }
        }

        let indices = join_indices(resources);
        let url = format!(
            "{}/_snapshot/{}/{}?wait_for_completion=true",
            self.base_url, self.config.repository, run_id
        );

        debug!("Snapshotting indices [{}] as '{}'", indices, run_id);
        let response = self
            .client
            .put(&url)
            .json(&json!({
                "indices": indices,
                "include_global_state": false,
            }))
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if !response.status().is_success() {
            let err = self.status_error("create snapshot", response).await;
            return Err(BackupError::DumpFailed {
                resource: indices,
                cause: err.to_string(),
            });
        }

        let body: Value = response.json().await?;
        let state = snapshot_state(&body).unwrap_or("UNKNOWN");
        if state != SNAPSHOT_STATE_SUCCESS {
            // PARTIAL and FAILED both leave no usable artifact reference.
            return Err(BackupError::DumpFailed {
                resource: indices,
                cause: format!("snapshot '{run_id}' finished in state {state}"),
            });
        }

        info!("Snapshot '{}' created covering {} indices", run_id, resources.len());
        let created_at = Utc::now();
        Ok(resources
            .iter()
            .map(|resource| Artifact {
                resource_id: resource.id.clone(),
                backend: BackendKind::Elasticsearch,
                created_at,
                size_bytes: 0,
                content_digest: None,
                location: ArtifactLocation::Snapshot {
                    repository: self.config.repository.clone(),
                    snapshot: run_id.to_string(),
                },
            })
            .collect())
    }

    async fn restore_run(&self, resources: &[Resource], snapshot: &str) -> Result<()> {
        // Precondition: the snapshot must exist in the repository.
        self.get_snapshot(snapshot).await?;

        for resource in resources {
            if self.index_exists(&resource.id).await? {
                self.close_index(&resource.id).await?;
            } else {
                self.create_index(&resource.id).await?;
            }
        }

        let indices = join_indices(resources);
        let url = format!(
            "{}/_snapshot/{}/{}/_restore?wait_for_completion=true",
            self.base_url, self.config.repository, snapshot
        );

        debug!("Restoring indices [{}] from snapshot '{}'", indices, snapshot);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "indices": indices }))
            .send()
            .await
            .map_err(BackupError::from_http)?;

        if !response.status().is_success() {
            let err = self.status_error("restore snapshot", response).await;
            return Err(BackupError::RestoreFailed {
                resource: indices,
                cause: err.to_string(),
            });
        }

        let body: Value = response.json().await?;
        let state = snapshot_state(&body).unwrap_or("UNKNOWN");
        if state != SNAPSHOT_STATE_SUCCESS {
            return Err(BackupError::RestoreFailed {
                resource: indices,
                cause: format!("restore from '{snapshot}' finished in state {state}"),
            });
        }

        info!("Restored {} indices from snapshot '{}'", resources.len(), snapshot);
        Ok(())
    }

    async fn resolve_snapshot(&self, snapshot: &str) -> Result<Vec<Resource>> {
        let indices = self.snapshot_indices(snapshot).await?;
        Ok(indices
            .into_iter()
            .map(|index| Resource::new(index, BackendKind::Elasticsearch))
            .collect())
    }
}

/// Authentication statuses are fatal; any other error status from a
/// reachable cluster stays scoped to the call that got it.
fn classify_status(action: &str, status: StatusCode, body: &str) -> BackupError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return BackupError::Auth(format!("{action}: {status}"));
    }
    BackupError::Backend(format!("{action}: {status} {body}"))
}

fn parse_index_listing(text: &str) -> Vec<Resource> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !EXCLUDED_INDICES.contains(line))
        .map(|index| Resource::new(index, BackendKind::Elasticsearch))
        .collect()
}

fn join_indices(resources: &[Resource]) -> String {
    resources
        .iter()
        .map(|r| r.id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn snapshot_state(body: &Value) -> Option<&str> {
    body["snapshot"]["state"].as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_listing_drops_geoip_database() {
        let listing = "project-a_file\n.geoip_databases\nproject-a_specimen\n\n";
        let resources = parse_index_listing(listing);
        let ids: Vec<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["project-a_file", "project-a_specimen"]);
    }

    #[test]
    fn batched_call_joins_all_indices() {
        let resources = vec![
            Resource::new("idx-a", BackendKind::Elasticsearch),
            Resource::new("idx-b", BackendKind::Elasticsearch),
            Resource::new("idx-c", BackendKind::Elasticsearch),
        ];
        assert_eq!(join_indices(&resources), "idx-a,idx-b,idx-c");
    }

    #[test]
    fn only_success_state_counts() {
        let success = json!({ "snapshot": { "snapshot": "s1", "state": "SUCCESS" } });
        assert_eq!(snapshot_state(&success), Some("SUCCESS"));

        let partial = json!({ "snapshot": { "snapshot": "s1", "state": "PARTIAL" } });
        assert_eq!(snapshot_state(&partial), Some("PARTIAL"));

        let missing = json!({ "accepted": true });
        assert_eq!(snapshot_state(&missing), None);
    }

    #[test]
    fn error_statuses_from_a_reachable_cluster_are_not_fatal() {
        let err = classify_status("create snapshot", StatusCode::BAD_REQUEST, "cannot snapshot");
        assert!(matches!(err, BackupError::Backend(_)));
        assert!(!err.is_fatal());

        let err = classify_status("close index", StatusCode::UNAUTHORIZED, "");
        assert!(matches!(err, BackupError::Auth(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn adapter_is_whole_run() {
        let adapter = ElasticAdapter::new(ElasticConfig {
            host: "localhost".into(),
            port: 9200,
            repository: "backups".into(),
            bucket: "backups".into(),
            endpoint: None,
        })
        .unwrap();
        assert_eq!(adapter.granularity(), DumpGranularity::WholeRun);
        assert!(adapter.expected_files(&Resource::new("idx", BackendKind::Elasticsearch)).is_empty());
    }
}
