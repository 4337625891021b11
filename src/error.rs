//! Error types shared across backends and the orchestrator.
//!
//! Two families matter for run control flow: fatal errors (the backend is
//! unreachable or rejects credentials - nothing else in the run can succeed)
//! and per-resource errors, which the orchestrator records in the manifest
//! and then moves on.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Backend unreachable. Fatal to the whole run.
    #[error("connection error: {0}")]
    Connection(String),

    /// Backend rejected credentials. Fatal to the whole run.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Invalid configuration, caught at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend answered an otherwise-valid call with an error status. The
    /// backend is reachable, so this stays scoped to the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// One resource's dump failed; the run continues.
    #[error("dump failed for '{resource}': {cause}")]
    DumpFailed { resource: String, cause: String },

    /// One resource's restore failed; the run continues.
    #[error("restore failed for '{resource}': {cause}")]
    RestoreFailed { resource: String, cause: String },

    /// Restore precondition unmet: the expected artifact does not exist.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Caller-imposed deadline expired. Scoped to the one call that timed
    /// out; never conflated with a backend-reported failure.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("object storage error: {0}")]
    Store(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Whether this error aborts the entire run rather than one resource.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackupError::Connection(_) | BackupError::Auth(_) | BackupError::Config(_)
        )
    }

    /// Classify a reqwest failure: transport-level problems mean the backend
    /// is unreachable, authentication statuses mean rejected credentials.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return BackupError::Connection(err.to_string());
        }
        if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return BackupError::Auth(err.to_string());
            }
        }
        BackupError::Http(err)
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(BackupError::Connection("refused".into()).is_fatal());
        assert!(BackupError::Auth("bad password".into()).is_fatal());
        assert!(BackupError::Config("missing bucket".into()).is_fatal());

        let scoped = BackupError::DumpFailed {
            resource: "db1".into(),
            cause: "exit status 1".into(),
        };
        assert!(!scoped.is_fatal());
        assert!(!BackupError::Backend("400 Bad Request".into()).is_fatal());
        assert!(!BackupError::ArtifactNotFound("db1.dump".into()).is_fatal());
        assert!(!BackupError::Timeout(Duration::from_secs(30)).is_fatal());
    }
}
