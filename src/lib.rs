//! polybak - backup and restore for heterogeneous data stores.
//!
//! One run protocol over three backends: Postgres databases (via the client
//! tools), Elasticsearch indices (via the snapshot API), and GRIP graphs (via
//! the bulk query/insert API), with artifacts persisted to S3-compatible
//! object storage.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod manifest;
pub mod orchestrator;
pub mod store;

// Re-export commonly used types
pub use error::BackupError;
pub use manifest::{RunId, RunManifest};
pub use orchestrator::Orchestrator;
pub type Result<T> = std::result::Result<T, BackupError>;
