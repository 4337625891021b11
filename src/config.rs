//! Per-backend connection configuration.
//!
//! Each config is built once at the CLI boundary (flags or environment
//! variables) and validated before any backend call is made.

use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};

/// Postgres connection parameters. The password, when present, is handed to
/// the client tools via `PGPASSWORD` rather than a command-line argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl PostgresConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BackupError::Config("postgres host must not be empty".into()));
        }
        if self.user.is_empty() {
            return Err(BackupError::Config("postgres user must not be empty".into()));
        }
        Ok(())
    }
}

/// Elasticsearch cluster plus the snapshot repository used for backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub host: String,
    pub port: u16,
    /// Snapshot repository name. Required for backup/restore, not for `ls`.
    #[serde(default)]
    pub repository: String,
    /// Bucket backing the snapshot repository (used by `repo init`).
    #[serde(default)]
    pub bucket: String,
    /// Optional S3 endpoint override for the repository (MinIO/Ceph).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl ElasticConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BackupError::Config("elasticsearch host must not be empty".into()));
        }
        Ok(())
    }

    /// Backup and restore additionally need a repository name.
    pub fn validate_repository(&self) -> Result<()> {
        self.validate()?;
        if self.repository.is_empty() {
            return Err(BackupError::Config(
                "snapshot repository name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// GRIP graph server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GripConfig {
    pub host: String,
    pub port: u16,
    /// Graph to back up or restore.
    pub graph: String,
    /// Per-query record limit. The adapter issues one bounded query and does
    /// not paginate past this.
    pub limit: u64,
    /// Whether the graph carries a schema-graph companion.
    pub schema_companion: bool,
}

impl GripConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BackupError::Config("grip host must not be empty".into()));
        }
        if self.graph.is_empty() {
            return Err(BackupError::Config("grip graph must not be empty".into()));
        }
        if self.limit == 0 {
            return Err(BackupError::Config("grip record limit must be positive".into()));
        }
        Ok(())
    }
}

/// Where S3 credentials come from. Decided once at startup, never re-derived
/// per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credentials {
    /// Explicit key pair from flags.
    Explicit { access_key: String, secret_key: String },
    /// Standard AWS environment-variable provider chain.
    Environment,
}

/// Object storage target for artifact transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint URL, e.g. `https://s3.amazonaws.com` or a MinIO/Ceph RGW
    /// address.
    pub endpoint: String,
    pub bucket: String,
    pub credentials: Credentials,
}

impl S3Config {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(BackupError::Config("s3 bucket must not be empty".into()));
        }
        if let Credentials::Explicit { access_key, secret_key } = &self.credentials {
            if access_key.is_empty() || secret_key.is_empty() {
                return Err(BackupError::Config(
                    "explicit s3 credentials must include both key and secret".into(),
                ));
            }
        }
        Ok(())
    }
}
