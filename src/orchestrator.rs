//! The backup/restore run protocol, written once over [`ResourceAdapter`].
//!
//! A run is sequential: resources are processed in enumeration order, one
//! adapter call at a time. Per-resource failures are recorded in the manifest
//! and the run continues; fatal errors (unreachable backend, rejected
//! credentials, bad configuration) abort immediately. Cancellation is honored
//! between resources, so the in-flight call always reaches a terminal state
//! and every completed entry is preserved.

use crate::adapter::{DumpGranularity, Resource, ResourceAdapter};
use crate::error::{BackupError, Result};
use crate::manifest::{ResourceResult, RestoreReport, RunId, RunManifest};
use crate::store::ArtifactStore;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-resource outcome sink, injected so the CLI can print human-readable
/// progress while tests record outcomes for assertion.
pub trait RunReporter: Send + Sync {
    fn resource_completed(&self, result: &ResourceResult);

    fn resource_skipped(&self, _resource: &Resource, _reason: &str) {}
}

/// Default reporter: outcomes go to the log.
pub struct LogReporter;

impl RunReporter for LogReporter {
    fn resource_completed(&self, result: &ResourceResult) {
        if result.is_success() {
            info!("{}: ok", result.resource.id);
        } else {
            warn!(
                "{}: failed: {}",
                result.resource.id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    fn resource_skipped(&self, resource: &Resource, reason: &str) {
        warn!("{}: skipped: {}", resource.id, reason);
    }
}

/// Where a restore gets its artifacts and resource list from.
pub enum RestoreSource {
    /// Replay the successful entries of a persisted run manifest. Artifact
    /// files are expected under `dir`.
    Manifest { manifest: RunManifest, dir: PathBuf },
    /// Re-derive the resource list from the backend and match artifact files
    /// found under `dir`.
    Directory { dir: PathBuf },
    /// Restore from a backend-side snapshot; the resource list comes from the
    /// snapshot itself.
    Snapshot { snapshot: String },
}

pub struct Orchestrator {
    adapter: Arc<dyn ResourceAdapter>,
    store: Option<ArtifactStore>,
    reporter: Arc<dyn RunReporter>,
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl Orchestrator {
    pub fn new(adapter: Arc<dyn ResourceAdapter>) -> Self {
        Self {
            adapter,
            store: None,
            reporter: Arc::new(LogReporter),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Attach an artifact store; artifacts and the manifest are uploaded
    /// under the `{run_id}/` prefix after the run.
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Impose a deadline on each adapter call. Expiry surfaces as
    /// [`BackupError::Timeout`], scoped to the one call that exceeded it.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run one backup: enumerate, dump each resource, persist the manifest,
    /// and upload the run directory when a store is attached.
    ///
    /// An empty backend yields an empty manifest, not an error. The returned
    /// manifest may contain failed entries; callers decide whether partial
    /// success is acceptable via [`RunManifest::is_clean`].
    pub async fn run_backup(&self, run_id: RunId, base_dir: &Path) -> Result<RunManifest> {
        let run_dir = base_dir.join(run_id.as_str());
        tokio::fs::create_dir_all(&run_dir).await?;

        let resources = self.bounded(self.adapter.list_resources()).await?;
        info!(
            "Starting {} backup run {} ({} resources)",
            self.adapter.backend(),
            run_id,
            resources.len()
        );

        let mut manifest = RunManifest::new(run_id, self.adapter.backend());
        match self.adapter.granularity() {
            DumpGranularity::PerResource => {
                self.dump_each(&resources, &run_dir, &mut manifest).await?;
            }
            DumpGranularity::WholeRun => {
                self.dump_whole_run(&resources, &run_dir, &mut manifest).await?;
            }
        }

        manifest.save(&run_dir).await?;

        if let Some(store) = &self.store {
            let failed = store.upload_dir(&run_dir, manifest.run_id.as_str()).await?;
            for key in &failed {
                warn!("Upload failed for {}", key);
            }
        }

        info!(
            "Backup run {} finished: {} ok, {} failed",
            manifest.run_id,
            manifest.entries.len() - manifest.failed_count(),
            manifest.failed_count()
        );
        Ok(manifest)
    }

    async fn dump_each(
        &self,
        resources: &[Resource],
        run_dir: &Path,
        manifest: &mut RunManifest,
    ) -> Result<()> {
        for resource in resources {
            if self.cancel.is_cancelled() {
                warn!(
                    "Run cancelled after {} of {} resources",
                    manifest.entries.len(),
                    resources.len()
                );
                break;
            }

            let result = match self.bounded(self.adapter.dump_resource(resource, run_dir)).await {
                Ok(artifact) => ResourceResult::success(resource.clone(), artifact),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => ResourceResult::failure(resource.clone(), &e),
            };
            self.reporter.resource_completed(&result);
            manifest.record(result);
        }
        Ok(())
    }

    /// Whole-run backends dump every resource in one backend call. A scoped
    /// failure of that call fails every resource of the run at once.
    async fn dump_whole_run(
        &self,
        resources: &[Resource],
        run_dir: &Path,
        manifest: &mut RunManifest,
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let run_id = manifest.run_id.as_str().to_string();
        let outcome = self
            .bounded(self.adapter.dump_run(resources, run_dir, &run_id))
            .await
            .and_then(|artifacts| {
                // One artifact per resource is the adapter contract; a short
                // batch must not silently drop manifest entries.
                if artifacts.len() == resources.len() {
                    Ok(artifacts)
                } else {
                    Err(BackupError::Backend(format!(
                        "backend produced {} artifacts for {} resources",
                        artifacts.len(),
                        resources.len()
                    )))
                }
            });
        match outcome {
            Ok(artifacts) => {
                for (resource, artifact) in resources.iter().zip(artifacts) {
                    let result = ResourceResult::success(resource.clone(), artifact);
                    self.reporter.resource_completed(&result);
                    manifest.record(result);
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                for resource in resources {
                    let result = ResourceResult::failure(resource.clone(), &e);
                    self.reporter.resource_completed(&result);
                    manifest.record(result);
                }
            }
        }
        Ok(())
    }

    /// Run one restore. Same continue-on-failure policy as backup: a
    /// per-resource failure is recorded and the run moves on, fatal kinds
    /// abort.
    pub async fn run_restore(&self, source: RestoreSource) -> Result<RestoreReport> {
        match source {
            RestoreSource::Manifest { manifest, dir } => {
                self.restore_from_manifest(manifest, &dir).await
            }
            RestoreSource::Directory { dir } => self.restore_from_directory(&dir).await,
            RestoreSource::Snapshot { snapshot } => self.restore_from_snapshot(&snapshot).await,
        }
    }

    async fn restore_from_manifest(
        &self,
        manifest: RunManifest,
        dir: &Path,
    ) -> Result<RestoreReport> {
        let mut report = RestoreReport::new(self.adapter.backend());

        for entry in &manifest.entries {
            if self.cancel.is_cancelled() {
                warn!("Restore cancelled after {} entries", report.entries.len());
                break;
            }

            let Some(artifact) = entry.artifact.as_ref().filter(|_| entry.is_success()) else {
                self.reporter
                    .resource_skipped(&entry.resource, "dump failed during the backup run");
                continue;
            };

            let result = match self
                .bounded(
                    self.adapter
                        .restore_resource(&entry.resource, &artifact.location, dir),
                )
                .await
            {
                Ok(()) => ResourceResult::success(entry.resource.clone(), artifact.clone()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => ResourceResult::failure(entry.resource.clone(), &e),
            };
            self.reporter.resource_completed(&result);
            report.record(result);
        }

        Ok(report)
    }

    /// Restore from a plain artifact directory: the backend supplies the
    /// resource list, the directory supplies the artifacts. Resources with no
    /// artifact files present are skipped; an incomplete artifact surfaces as
    /// a recorded `ArtifactNotFound` for that resource only.
    async fn restore_from_directory(&self, dir: &Path) -> Result<RestoreReport> {
        if self.adapter.granularity() == DumpGranularity::WholeRun {
            return Err(BackupError::Config(
                "this backend restores from snapshots, not artifact directories".into(),
            ));
        }

        let resources = self.bounded(self.adapter.list_resources()).await?;
        let mut report = RestoreReport::new(self.adapter.backend());

        for resource in resources {
            if self.cancel.is_cancelled() {
                warn!("Restore cancelled after {} entries", report.entries.len());
                break;
            }

            let expected = self.adapter.expected_files(&resource);
            let mut present = false;
            for name in &expected {
                if tokio::fs::try_exists(dir.join(name)).await? {
                    present = true;
                    break;
                }
            }
            if !present {
                debug!("No artifact for '{}' in {}", resource.id, dir.display());
                continue;
            }

            let location = crate::adapter::ArtifactLocation::Files(expected.clone());
            let result = match self
                .bounded(self.adapter.restore_resource(&resource, &location, dir))
                .await
            {
                Ok(()) => {
                    // A successful restore implies every expected file was
                    // present, so the metadata read cannot miss.
                    let artifact =
                        crate::adapter::Artifact::from_files(&resource, dir, expected).await?;
                    ResourceResult::success(resource.clone(), artifact)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => ResourceResult::failure(resource.clone(), &e),
            };
            self.reporter.resource_completed(&result);
            report.record(result);
        }

        Ok(report)
    }

    /// Restore from a backend-side snapshot: the snapshot supplies both the
    /// resource list and the artifact.
    async fn restore_from_snapshot(&self, snapshot: &str) -> Result<RestoreReport> {
        let resources = self.bounded(self.adapter.resolve_snapshot(snapshot)).await?;
        let mut report = RestoreReport::new(self.adapter.backend());

        match self.bounded(self.adapter.restore_run(&resources, snapshot)).await {
            Ok(()) => {
                for resource in &resources {
                    // Snapshot restores have no local artifact to describe;
                    // the entry records the outcome only.
                    let result = ResourceResult {
                        resource: resource.clone(),
                        status: crate::manifest::ResourceStatus::Success,
                        artifact: None,
                        error: None,
                    };
                    self.reporter.resource_completed(&result);
                    report.record(result);
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                for resource in &resources {
                    let result = ResourceResult::failure(resource.clone(), &e);
                    self.reporter.resource_completed(&result);
                    report.record(result);
                }
            }
        }

        Ok(report)
    }

    /// Apply the configured deadline to one adapter call.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackupError::Timeout(limit))?,
            None => call.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Artifact, ArtifactLocation, BackendKind};
    use crate::manifest::ResourceStatus;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted backend: dumps write real files, failures and fatal errors
    /// are triggered by resource id.
    struct FakeAdapter {
        resources: Vec<Resource>,
        fail_dump: HashSet<String>,
        fatal_dump: HashSet<String>,
        dump_delay: Option<Duration>,
        cancel_after_dump: Option<CancellationToken>,
        restored: Mutex<Vec<String>>,
    }

    impl FakeAdapter {
        fn new(ids: &[&str]) -> Self {
            Self {
                resources: ids
                    .iter()
                    .map(|id| Resource::new(*id, BackendKind::Postgres))
                    .collect(),
                fail_dump: HashSet::new(),
                fatal_dump: HashSet::new(),
                dump_delay: None,
                cancel_after_dump: None,
                restored: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, id: &str) -> Self {
            self.fail_dump.insert(id.to_string());
            self
        }

        fn fatal_on(mut self, id: &str) -> Self {
            self.fatal_dump.insert(id.to_string());
            self
        }
    }

    #[async_trait]
    impl ResourceAdapter for FakeAdapter {
        fn backend(&self) -> BackendKind {
            BackendKind::Postgres
        }

        async fn list_resources(&self) -> Result<Vec<Resource>> {
            Ok(self.resources.clone())
        }

        async fn dump_resource(&self, resource: &Resource, run_dir: &Path) -> Result<Artifact> {
            if let Some(delay) = self.dump_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fatal_dump.contains(&resource.id) {
                return Err(BackupError::Connection("backend went away".into()));
            }
            if self.fail_dump.contains(&resource.id) {
                return Err(BackupError::DumpFailed {
                    resource: resource.id.clone(),
                    cause: "exit status 1".into(),
                });
            }

            let file_name = format!("{}.dump", resource.id);
            tokio::fs::write(run_dir.join(&file_name), resource.id.as_bytes()).await?;
            if let Some(token) = &self.cancel_after_dump {
                token.cancel();
            }
            Artifact::from_files(resource, run_dir, vec![file_name]).await
        }

        async fn restore_resource(
            &self,
            resource: &Resource,
            location: &ArtifactLocation,
            dir: &Path,
        ) -> Result<()> {
            let ArtifactLocation::Files(names) = location else {
                panic!("fake adapter artifacts are files");
            };
            for name in names {
                if !tokio::fs::try_exists(dir.join(name)).await? {
                    return Err(BackupError::ArtifactNotFound(name.clone()));
                }
            }
            self.restored.lock().unwrap().push(resource.id.clone());
            Ok(())
        }

        fn expected_files(&self, resource: &Resource) -> Vec<String> {
            vec![format!("{}.dump", resource.id)]
        }
    }

    fn statuses(entries: &[ResourceResult]) -> Vec<(String, ResourceStatus)> {
        entries
            .iter()
            .map(|e| (e.resource.id.clone(), e.status))
            .collect()
    }

    #[tokio::test]
    async fn backup_records_one_entry_per_resource_in_order() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2", "db3"]));
        let base = TempDir::new().unwrap();

        let orchestrator = Orchestrator::new(adapter);
        let manifest = orchestrator
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        assert_eq!(
            statuses(&manifest.entries),
            vec![
                ("db1".into(), ResourceStatus::Success),
                ("db2".into(), ResourceStatus::Success),
                ("db3".into(), ResourceStatus::Success),
            ]
        );
        assert!(manifest.is_clean());

        // The manifest was persisted next to the artifacts.
        let run_dir = base.path().join(manifest.run_id.as_str());
        let reloaded = RunManifest::load(&run_dir).await.unwrap();
        assert_eq!(reloaded.entries.len(), 3);
    }

    #[tokio::test]
    async fn partial_failure_does_not_abort_the_run() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2", "db3"]).failing("db2"));
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(adapter)
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        assert_eq!(
            statuses(&manifest.entries),
            vec![
                ("db1".into(), ResourceStatus::Success),
                ("db2".into(), ResourceStatus::Failed),
                ("db3".into(), ResourceStatus::Success),
            ]
        );
        assert_eq!(manifest.failed_count(), 1);
        assert!(manifest.entry_for("db2").unwrap().error.is_some());
    }

    #[tokio::test]
    async fn fatal_error_aborts_immediately() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2", "db3"]).fatal_on("db2"));
        let base = TempDir::new().unwrap();

        let err = Orchestrator::new(adapter)
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Connection(_)));
    }

    #[tokio::test]
    async fn empty_backend_yields_empty_manifest() {
        let adapter = Arc::new(FakeAdapter::new(&[]));
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(adapter)
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();
        assert!(manifest.entries.is_empty());
        assert!(manifest.is_clean());
    }

    #[tokio::test]
    async fn backup_uploads_artifacts_and_manifest() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2"]));
        let base = TempDir::new().unwrap();
        let store = ArtifactStore::in_memory();

        let manifest = Orchestrator::new(adapter)
            .with_store(store.clone())
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        let keys = store.list(manifest.run_id.as_str()).await.unwrap();
        let run = manifest.run_id.as_str();
        assert_eq!(
            keys,
            vec![
                format!("{run}/db1.dump"),
                format!("{run}/db2.dump"),
                format!("{run}/manifest.json"),
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_preserves_completed_entries() {
        let token = CancellationToken::new();
        let mut adapter = FakeAdapter::new(&["db1", "db2", "db3"]);
        adapter.cancel_after_dump = Some(token.clone());
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(Arc::new(adapter))
            .with_cancellation(token)
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        // The first dump cancels the token; the remaining resources are
        // never attempted but the completed entry survives.
        assert_eq!(statuses(&manifest.entries), vec![("db1".into(), ResourceStatus::Success)]);
    }

    #[tokio::test]
    async fn deadline_expiry_is_recorded_not_fatal() {
        let mut adapter = FakeAdapter::new(&["db1"]);
        adapter.dump_delay = Some(Duration::from_millis(200));
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(Arc::new(adapter))
            .with_deadline(Duration::from_millis(10))
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        let entry = manifest.entry_for("db1").unwrap();
        assert_eq!(entry.status, ResourceStatus::Failed);
        assert!(entry.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn manifest_restore_replays_successful_entries_only() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2", "db3"]).failing("db2"));
        let base = TempDir::new().unwrap();

        let orchestrator = Orchestrator::new(adapter.clone());
        let manifest = orchestrator.run_backup(RunId::now(), base.path()).await.unwrap();
        let run_dir = base.path().join(manifest.run_id.as_str());

        let report = orchestrator
            .run_restore(RestoreSource::Manifest { manifest, dir: run_dir })
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.entries.len(), 2);
        assert_eq!(*adapter.restored.lock().unwrap(), vec!["db1", "db3"]);
    }

    #[tokio::test]
    async fn missing_artifact_is_recorded_for_that_resource_only() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2"]));
        let dir = TempDir::new().unwrap();
        // db1's artifact exists, db2's is truncated to nothing on disk.
        tokio::fs::write(dir.path().join("db1.dump"), b"db1").await.unwrap();

        let mut manifest = RunManifest::new(RunId::now(), BackendKind::Postgres);
        for id in ["db1", "db2"] {
            let resource = Resource::new(id, BackendKind::Postgres);
            let artifact = Artifact {
                resource_id: id.into(),
                backend: BackendKind::Postgres,
                created_at: chrono::Utc::now(),
                size_bytes: 3,
                content_digest: None,
                location: ArtifactLocation::Files(vec![format!("{id}.dump")]),
            };
            manifest.record(ResourceResult::success(resource, artifact));
        }

        let report = Orchestrator::new(adapter.clone())
            .run_restore(RestoreSource::Manifest {
                manifest,
                dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();

        assert_eq!(
            statuses(&report.entries),
            vec![
                ("db1".into(), ResourceStatus::Success),
                ("db2".into(), ResourceStatus::Failed),
            ]
        );
        let failure = report.entries[1].error.as_deref().unwrap();
        assert!(failure.contains("artifact not found"));
        assert_eq!(*adapter.restored.lock().unwrap(), vec!["db1"]);
    }

    #[tokio::test]
    async fn directory_restore_matches_present_artifacts() {
        let adapter = Arc::new(FakeAdapter::new(&["db1", "db2", "db3"]));
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("db1.dump"), b"db1").await.unwrap();
        tokio::fs::write(dir.path().join("db3.dump"), b"db3").await.unwrap();

        let report = Orchestrator::new(adapter.clone())
            .run_restore(RestoreSource::Directory {
                dir: dir.path().to_path_buf(),
            })
            .await
            .unwrap();

        // db2 has no artifact in the directory and is not attempted.
        assert_eq!(
            statuses(&report.entries),
            vec![
                ("db1".into(), ResourceStatus::Success),
                ("db3".into(), ResourceStatus::Success),
            ]
        );
    }

    /// Scripted whole-run backend: one batched call covers every resource,
    /// like a snapshot-based search cluster.
    struct WholeRunFake {
        resources: Vec<Resource>,
        fail_batch: bool,
        short_batch: bool,
    }

    impl WholeRunFake {
        fn new(ids: &[&str]) -> Self {
            Self {
                resources: ids
                    .iter()
                    .map(|id| Resource::new(*id, BackendKind::Elasticsearch))
                    .collect(),
                fail_batch: false,
                short_batch: false,
            }
        }

        fn snapshot_artifact(&self, resource: &Resource, snapshot: &str) -> Artifact {
            Artifact {
                resource_id: resource.id.clone(),
                backend: BackendKind::Elasticsearch,
                created_at: chrono::Utc::now(),
                size_bytes: 0,
                content_digest: None,
                location: ArtifactLocation::Snapshot {
                    repository: "backups".into(),
                    snapshot: snapshot.to_string(),
                },
            }
        }
    }

    #[async_trait]
    impl ResourceAdapter for WholeRunFake {
        fn backend(&self) -> BackendKind {
            BackendKind::Elasticsearch
        }

        async fn list_resources(&self) -> Result<Vec<Resource>> {
            Ok(self.resources.clone())
        }

        async fn dump_resource(&self, resource: &Resource, _run_dir: &Path) -> Result<Artifact> {
            panic!("whole-run backend dumped '{}' individually", resource.id);
        }

        async fn restore_resource(
            &self,
            _resource: &Resource,
            _location: &ArtifactLocation,
            _dir: &Path,
        ) -> Result<()> {
            Ok(())
        }

        fn expected_files(&self, _resource: &Resource) -> Vec<String> {
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
            if self.fail_batch {
                return Err(BackupError::DumpFailed {
                    resource: "idx-a,idx-b,idx-c".into(),
                    cause: format!("snapshot '{run_id}' finished in state PARTIAL"),
                });
            }
            let mut artifacts: Vec<Artifact> = resources
                .iter()
                .map(|r| self.snapshot_artifact(r, run_id))
                .collect();
            if self.short_batch {
                artifacts.pop();
            }
            Ok(artifacts)
        }

        async fn restore_run(&self, _resources: &[Resource], snapshot: &str) -> Result<()> {
            if self.fail_batch {
                return Err(BackupError::RestoreFailed {
                    resource: "idx-a,idx-b,idx-c".into(),
                    cause: format!("restore from '{snapshot}' finished in state PARTIAL"),
                });
            }
            Ok(())
        }

        async fn resolve_snapshot(&self, _snapshot: &str) -> Result<Vec<Resource>> {
            Ok(self.resources.clone())
        }
    }

    #[tokio::test]
    async fn whole_run_backup_fans_out_one_entry_per_resource() {
        let adapter = Arc::new(WholeRunFake::new(&["idx-a", "idx-b", "idx-c"]));
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(adapter)
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        assert!(manifest.is_clean());
        assert_eq!(manifest.entries.len(), 3);
        // Every entry references the same run-named snapshot.
        for entry in &manifest.entries {
            let location = &entry.artifact.as_ref().unwrap().location;
            assert_eq!(
                *location,
                ArtifactLocation::Snapshot {
                    repository: "backups".into(),
                    snapshot: manifest.run_id.as_str().to_string(),
                }
            );
        }
    }

    #[tokio::test]
    async fn whole_run_batch_failure_marks_every_resource_failed() {
        let mut adapter = WholeRunFake::new(&["idx-a", "idx-b", "idx-c"]);
        adapter.fail_batch = true;
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(Arc::new(adapter))
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        assert_eq!(
            statuses(&manifest.entries),
            vec![
                ("idx-a".into(), ResourceStatus::Failed),
                ("idx-b".into(), ResourceStatus::Failed),
                ("idx-c".into(), ResourceStatus::Failed),
            ]
        );
        assert!(manifest.entries[0].error.as_deref().unwrap().contains("PARTIAL"));
    }

    #[tokio::test]
    async fn short_artifact_batch_fails_every_resource() {
        let mut adapter = WholeRunFake::new(&["idx-a", "idx-b"]);
        adapter.short_batch = true;
        let base = TempDir::new().unwrap();

        let manifest = Orchestrator::new(Arc::new(adapter))
            .run_backup(RunId::now(), base.path())
            .await
            .unwrap();

        // A batch shorter than the resource list never truncates the
        // manifest; it fails the run's resources instead.
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.failed_count(), 2);
        assert!(manifest.entries[0]
            .error
            .as_deref()
            .unwrap()
            .contains("1 artifacts for 2 resources"));
    }

    #[tokio::test]
    async fn snapshot_restore_records_every_resolved_resource() {
        let adapter = Arc::new(WholeRunFake::new(&["idx-a", "idx-b"]));

        let report = Orchestrator::new(adapter)
            .run_restore(RestoreSource::Snapshot {
                snapshot: "20260826T000000Z".into(),
            })
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(
            statuses(&report.entries),
            vec![
                ("idx-a".into(), ResourceStatus::Success),
                ("idx-b".into(), ResourceStatus::Success),
            ]
        );
    }

    #[tokio::test]
    async fn snapshot_restore_batch_failure_marks_every_resource() {
        let mut adapter = WholeRunFake::new(&["idx-a", "idx-b"]);
        adapter.fail_batch = true;

        let report = Orchestrator::new(Arc::new(adapter))
            .run_restore(RestoreSource::Snapshot {
                snapshot: "20260826T000000Z".into(),
            })
            .await
            .unwrap();

        assert_eq!(report.failed_count(), 2);
        assert!(report.entries[0].error.as_deref().unwrap().contains("PARTIAL"));
    }
}
