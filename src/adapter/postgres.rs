//! Postgres adapter - shells out to the Postgres client tools.
//!
//! Dumps use `pg_dump --format=c` (the custom binary format), which pins the
//! restore path to `pg_restore` rather than raw SQL replay. Resource
//! enumeration goes through `psql` so the adapter's whole Postgres contract
//! stays on the client tools the dump format already requires.

use crate::adapter::{Artifact, ArtifactLocation, BackendKind, Resource, ResourceAdapter};
use crate::config::PostgresConfig;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const LIST_DATABASES_SQL: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false;";

pub struct PostgresAdapter {
    config: PostgresConfig,
}

impl PostgresAdapter {
    pub fn new(config: PostgresConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn dump_file_name(resource: &Resource) -> String {
        format!("{}.dump", resource.id)
    }

    /// Base invocation for a client tool, with connection arguments and the
    /// password (if configured) in the child environment.
    fn tool(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&self.config.host)
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("-U")
            .arg(&self.config.user);
        if let Some(password) = &self.config.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }

    /// Check that the target database exists. `pg_restore` does not create
    /// databases, so a missing target should fail fast with a clear error
    /// instead of a tool-level one.
    async fn database_exists(&self, database: &str) -> Result<bool> {
        let resources = self.list_resources().await?;
        Ok(resources.iter().any(|r| r.id == database))
    }
}

#[async_trait]
impl ResourceAdapter for PostgresAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let output = self
            .tool("psql")
            .arg("-At")
            .arg("-c")
            .arg(LIST_DATABASES_SQL)
            .arg("--no-password")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BackupError::Connection(format!("failed to run psql: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_connection_failure(&stderr));
        }

        let databases = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|name| Resource::new(name, BackendKind::Postgres))
            .collect();
        Ok(databases)
    }

    async fn dump_resource(&self, resource: &Resource, run_dir: &Path) -> Result<Artifact> {
        let file_name = Self::dump_file_name(resource);
        let dump_path = run_dir.join(&file_name);

        debug!("Dumping database '{}' to '{}'", resource.id, dump_path.display());

        // pg_dump writes the dump to stdout; direct it straight at the file.
        let dump_file = std::fs::File::create(&dump_path)?;
        let child = self
            .tool("pg_dump")
            .arg("-d")
            .arg(&resource.id)
            .arg("--format=c")
            .arg("--no-password")
            .stdout(Stdio::from(dump_file))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackupError::Connection(format!("failed to run pg_dump: {e}")))?;

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if let Some(fatal) = connection_failure(&stderr) {
                return Err(fatal);
            }
            // Do not leave a partial dump behind.
            let _ = tokio::fs::remove_file(&dump_path).await;
            return Err(BackupError::DumpFailed {
                resource: resource.id.clone(),
                cause: format!("pg_dump {}: {}", output.status, stderr.trim()),
            });
        }

        Artifact::from_files(resource, run_dir, vec![file_name]).await
    }

    async fn restore_resource(
        &self,
        resource: &Resource,
        location: &ArtifactLocation,
        dir: &Path,
    ) -> Result<()> {
        let file_name = match location {
            ArtifactLocation::Files(names) if !names.is_empty() => names[0].clone(),
            _ => Self::dump_file_name(resource),
        };
        let dump_path = dir.join(&file_name);

        if !tokio::fs::try_exists(&dump_path).await? {
            return Err(BackupError::ArtifactNotFound(dump_path.display().to_string()));
        }

        if !self.database_exists(&resource.id).await? {
            return Err(BackupError::RestoreFailed {
                resource: resource.id.clone(),
                cause: format!("database '{}' does not exist on the target", resource.id),
            });
        }

        debug!(
            "Restoring database '{}' from '{}'",
            resource.id,
            dump_path.display()
        );

        let output = self
            .tool("pg_restore")
            .arg("-d")
            .arg(&resource.id)
            .arg("--no-password")
            .arg(&dump_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BackupError::Connection(format!("failed to run pg_restore: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if let Some(fatal) = connection_failure(&stderr) {
                return Err(fatal);
            }
            return Err(BackupError::RestoreFailed {
                resource: resource.id.clone(),
                cause: format!("pg_restore {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(())
    }

    fn expected_files(&self, resource: &Resource) -> Vec<String> {
        vec![Self::dump_file_name(resource)]
    }
}

/// Pick out connection-level failures from tool stderr. These abort the run;
/// anything else stays scoped to the resource being processed.
fn connection_failure(stderr: &str) -> Option<BackupError> {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication failed") || lower.contains("no password supplied") {
        return Some(BackupError::Auth(stderr.trim().to_string()));
    }
    if lower.contains("could not connect")
        || lower.contains("connection refused")
        || lower.contains("could not translate host name")
    {
        return Some(BackupError::Connection(stderr.trim().to_string()));
    }
    None
}

/// Enumeration can only fail at the connection level.
fn classify_connection_failure(stderr: &str) -> BackupError {
    connection_failure(stderr)
        .unwrap_or_else(|| BackupError::Connection(stderr.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PostgresConfig {
        PostgresConfig {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: Some("secret".into()),
        }
    }

    #[test]
    fn expected_files_use_custom_format_extension() {
        let adapter = PostgresAdapter::new(config()).unwrap();
        let resource = Resource::new("gen3_fence", BackendKind::Postgres);
        assert_eq!(adapter.expected_files(&resource), vec!["gen3_fence.dump"]);
    }

    #[test]
    fn auth_failures_are_fatal() {
        let err = classify_connection_failure(
            "psql: error: FATAL: password authentication failed for user \"postgres\"",
        );
        assert!(matches!(err, BackupError::Auth(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn unreachable_host_is_a_connection_error() {
        let err = classify_connection_failure(
            "psql: error: could not connect to server: Connection refused",
        );
        assert!(matches!(err, BackupError::Connection(_)));
    }

    #[test]
    fn tool_errors_stay_scoped_to_the_resource() {
        // A dump-level failure (bad table, disk full) is not fatal.
        assert!(connection_failure("pg_dump: error: query failed").is_none());
    }

    #[test]
    fn rejects_invalid_config() {
        let config = PostgresConfig {
            host: String::new(),
            port: 5432,
            user: "postgres".into(),
            password: None,
        };
        assert!(PostgresAdapter::new(config).is_err());
    }
}
