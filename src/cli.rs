//! Command-line surface.
//!
//! One subcommand group per backend (`pg`, `es`, `grip`) plus `s3` for plain
//! object-store operations. Backup and restore attach the artifact store only
//! when `--endpoint`/`--bucket` are given; otherwise artifacts stay in the
//! local directory.

use crate::adapter::elastic::ElasticAdapter;
use crate::adapter::grip::{ElementKind, GripAdapter};
use crate::adapter::postgres::PostgresAdapter;
use crate::adapter::ResourceAdapter;
use crate::config::{Credentials, ElasticConfig, GripConfig, PostgresConfig, S3Config};
use crate::error::BackupError;
use crate::manifest::{ResourceResult, RunId, RunManifest};
use crate::orchestrator::{Orchestrator, RestoreSource, RunReporter};
use crate::store::ArtifactStore;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "polybak", author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    pub log_level: String,

    /// Deadline in seconds applied to each backend call
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Postgres databases
    Pg {
        #[command(flatten)]
        conn: PgArgs,
        #[command(subcommand)]
        action: PgAction,
    },
    /// Elasticsearch indices
    Es {
        #[command(flatten)]
        conn: EsArgs,
        #[command(subcommand)]
        action: EsAction,
    },
    /// GRIP graphs
    Grip {
        #[command(flatten)]
        conn: GripArgs,
        #[command(subcommand)]
        action: GripAction,
    },
    /// Object-store operations
    S3 {
        #[command(flatten)]
        target: S3TargetArgs,
        #[command(subcommand)]
        action: S3Action,
    },
}

#[derive(Args, Debug)]
pub struct PgArgs {
    #[arg(short = 'H', long, env = "PGHOST", default_value = "localhost")]
    pub host: String,
    #[arg(short = 'p', long, env = "PGPORT", default_value_t = 5432)]
    pub port: u16,
    #[arg(short = 'u', long, env = "PGUSER", default_value = "postgres")]
    pub user: String,
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum PgAction {
    /// List databases
    Ls,
    /// Dump every database into a new run
    Backup {
        #[command(flatten)]
        dir: DirArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Restore databases from a run or a plain artifact directory
    Restore {
        #[command(flatten)]
        dir: DirArgs,
        #[command(flatten)]
        store: StoreArgs,
        /// Run id to restore from; without it the directory itself is scanned
        #[arg(long)]
        run: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct EsArgs {
    #[arg(short = 'H', long, env = "ES_HOST", default_value = "localhost")]
    pub host: String,
    #[arg(short = 'p', long, env = "ES_PORT", default_value_t = 9200)]
    pub port: u16,
    /// Snapshot repository name
    #[arg(short = 'r', long)]
    pub repo: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum EsAction {
    /// List indices; with --repos/-r/--snapshot, list repository contents
    Ls {
        /// List registered snapshot repositories
        #[arg(long)]
        repos: bool,
        /// List the indices recorded in one snapshot of --repo
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// Snapshot every index into a new run
    Backup {
        #[command(flatten)]
        dir: DirArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Restore indices from a snapshot
    Restore {
        /// Run id whose snapshot to restore
        #[arg(long)]
        run: Option<String>,
        /// Snapshot name, for snapshots not created by a backup run
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// Manage the snapshot repository
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum RepoAction {
    /// Register the repository (idempotent)
    Init {
        /// Bucket backing the repository
        #[arg(short = 'b', long)]
        bucket: String,
        /// S3 endpoint override for the repository (MinIO/Ceph)
        #[arg(short = 'e', long)]
        endpoint: Option<String>,
    },
    /// Delete the repository; every snapshot under it becomes unaddressable
    Rm {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct GripArgs {
    #[arg(short = 'H', long, env = "GRIP_HOST", default_value = "localhost")]
    pub host: String,
    #[arg(short = 'p', long, env = "GRIP_PORT", default_value_t = 8201)]
    pub port: u16,
    /// Graph to operate on
    #[arg(short = 'g', long)]
    pub graph: String,
    /// Per-query record limit; queries are bounded, not paginated
    #[arg(long, default_value_t = 100_000)]
    pub limit: u64,
    /// Do not include the graph's schema companion
    #[arg(long)]
    pub no_schema: bool,
}

#[derive(Subcommand, Debug)]
pub enum GripAction {
    /// Print graph elements, bounded by --limit
    Ls {
        /// Print vertices only
        #[arg(long)]
        vertex: bool,
        /// Print edges only
        #[arg(long)]
        edge: bool,
    },
    /// Dump the graph into a new run
    Backup {
        #[command(flatten)]
        dir: DirArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Restore the graph from a run or a plain artifact directory
    Restore {
        #[command(flatten)]
        dir: DirArgs,
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        run: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum S3Action {
    /// List object keys
    Ls {
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Upload a local directory under a run prefix
    Upload {
        #[command(flatten)]
        dir: DirArgs,
        /// Prefix to upload under; defaults to the directory name
        #[arg(long)]
        run: Option<String>,
    },
    /// Download a run prefix into a local directory
    Download {
        #[command(flatten)]
        dir: DirArgs,
        #[arg(long)]
        run: String,
    },
}

#[derive(Args, Debug)]
pub struct DirArgs {
    /// Local artifact directory
    #[arg(short = 'd', long, default_value = "backups")]
    pub dir: PathBuf,
}

/// Object-store attachment. Backup and restore work without one; `--endpoint`
/// and `--bucket` together attach it.
#[derive(Args, Debug)]
pub struct StoreArgs {
    #[arg(short = 'e', long)]
    pub endpoint: Option<String>,
    #[arg(short = 'b', long)]
    pub bucket: Option<String>,
    #[arg(long, env = "ACCESS_KEY", hide_env_values = true)]
    pub key: Option<String>,
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret: Option<String>,
}

impl StoreArgs {
    fn credentials(&self) -> crate::Result<Credentials> {
        match (&self.key, &self.secret) {
            (Some(access_key), Some(secret_key)) => Ok(Credentials::Explicit {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            }),
            (None, None) => Ok(Credentials::Environment),
            _ => Err(BackupError::Config(
                "--key and --secret must be given together".into(),
            )),
        }
    }

    fn store(&self) -> crate::Result<Option<ArtifactStore>> {
        match (&self.endpoint, &self.bucket) {
            (Some(endpoint), Some(bucket)) => {
                let config = S3Config {
                    endpoint: endpoint.clone(),
                    bucket: bucket.clone(),
                    credentials: self.credentials()?,
                };
                Ok(Some(ArtifactStore::s3(&config)?))
            }
            (None, None) => Ok(None),
            _ => Err(BackupError::Config(
                "--endpoint and --bucket must be given together".into(),
            )),
        }
    }
}

/// Required object-store target for the `s3` group.
#[derive(Args, Debug)]
pub struct S3TargetArgs {
    #[arg(short = 'e', long)]
    pub endpoint: String,
    #[arg(short = 'b', long)]
    pub bucket: String,
    #[arg(long, env = "ACCESS_KEY", hide_env_values = true)]
    pub key: Option<String>,
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret: Option<String>,
}

impl S3TargetArgs {
    fn store(&self) -> crate::Result<ArtifactStore> {
        let credentials = match (&self.key, &self.secret) {
            (Some(access_key), Some(secret_key)) => Credentials::Explicit {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            },
            (None, None) => Credentials::Environment,
            _ => {
                return Err(BackupError::Config(
                    "--key and --secret must be given together".into(),
                ))
            }
        };
        ArtifactStore::s3(&S3Config {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            credentials,
        })
    }
}

/// Reporter used by the CLI: one line per resource as it completes.
struct ConsoleReporter;

impl RunReporter for ConsoleReporter {
    fn resource_completed(&self, result: &ResourceResult) {
        if result.is_success() {
            println!("  ok      {}", result.resource.id);
        } else {
            println!(
                "  failed  {}: {}",
                result.resource.id,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    fn resource_skipped(&self, resource: &crate::adapter::Resource, reason: &str) {
        println!("  skipped {}: {}", resource.id, reason);
    }
}

impl Cli {
    /// Run the selected command. `Ok(true)` means every attempted resource
    /// succeeded; `Ok(false)` turns into a non-zero exit after all outcomes
    /// have been reported.
    pub async fn execute(self) -> anyhow::Result<bool> {
        let deadline = self.timeout_secs.map(Duration::from_secs);

        match self.command {
            Command::Pg { conn, action } => {
                let adapter = Arc::new(PostgresAdapter::new(PostgresConfig {
                    host: conn.host,
                    port: conn.port,
                    user: conn.user,
                    password: conn.password,
                })?);
                match action {
                    PgAction::Ls => list_resources(adapter.as_ref()).await,
                    PgAction::Backup { dir, store } => {
                        backup(adapter, &dir.dir, &store, deadline).await
                    }
                    PgAction::Restore { dir, store, run } => {
                        restore_local(adapter, &dir.dir, &store, run, deadline).await
                    }
                }
            }

            Command::Es { conn, action } => {
                let config = ElasticConfig {
                    host: conn.host,
                    port: conn.port,
                    repository: conn.repo.unwrap_or_default(),
                    bucket: String::new(),
                    endpoint: None,
                };
                match action {
                    EsAction::Ls { repos, snapshot } => es_ls(config, repos, snapshot).await,
                    EsAction::Backup { dir, store } => {
                        let adapter = Arc::new(ElasticAdapter::new(config)?);
                        backup(adapter, &dir.dir, &store, deadline).await
                    }
                    EsAction::Restore { run, snapshot } => {
                        es_restore(config, run, snapshot, deadline).await
                    }
                    EsAction::Repo { action } => es_repo(config, action).await,
                }
            }

            Command::Grip { conn, action } => {
                let config = GripConfig {
                    host: conn.host,
                    port: conn.port,
                    graph: conn.graph,
                    limit: conn.limit,
                    schema_companion: !conn.no_schema,
                };
                match action {
                    GripAction::Ls { vertex, edge } => grip_ls(config, vertex, edge).await,
                    GripAction::Backup { dir, store } => {
                        let adapter = Arc::new(GripAdapter::new(config)?);
                        backup(adapter, &dir.dir, &store, deadline).await
                    }
                    GripAction::Restore { dir, store, run } => {
                        let adapter = Arc::new(GripAdapter::new(config)?);
                        restore_local(adapter, &dir.dir, &store, run, deadline).await
                    }
                }
            }

            Command::S3 { target, action } => s3_command(target, action).await,
        }
    }
}

async fn list_resources(adapter: &dyn ResourceAdapter) -> anyhow::Result<bool> {
    for resource in adapter.list_resources().await? {
        println!("{}", resource.id);
    }
    Ok(true)
}

/// Cancel the run on Ctrl-C: the in-flight resource finishes, the rest are
/// skipped, and the manifest keeps every completed entry.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the in-flight resource");
            handle.cancel();
        }
    });
    token
}

fn orchestrator(
    adapter: Arc<dyn ResourceAdapter>,
    store: Option<ArtifactStore>,
    deadline: Option<Duration>,
) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(adapter)
        .with_reporter(Arc::new(ConsoleReporter))
        .with_cancellation(cancel_on_interrupt());
    if let Some(store) = store {
        orchestrator = orchestrator.with_store(store);
    }
    if let Some(deadline) = deadline {
        orchestrator = orchestrator.with_deadline(deadline);
    }
    orchestrator
}

async fn backup(
    adapter: Arc<dyn ResourceAdapter>,
    dir: &Path,
    store: &StoreArgs,
    deadline: Option<Duration>,
) -> anyhow::Result<bool> {
    let run_id = RunId::now();
    println!("run {run_id}");
    let manifest = orchestrator(adapter, store.store()?, deadline)
        .run_backup(run_id, dir)
        .await?;
    Ok(manifest.is_clean())
}

/// Restore for file-artifact backends: from a named run (downloading it first
/// when a store is attached) or from the plain directory.
async fn restore_local(
    adapter: Arc<dyn ResourceAdapter>,
    dir: &Path,
    store: &StoreArgs,
    run: Option<String>,
    deadline: Option<Duration>,
) -> anyhow::Result<bool> {
    let store = store.store()?;

    let source = match run {
        Some(run) => {
            let run_id = RunId::parse(&run)?;
            let run_dir = dir.join(run_id.as_str());
            if let Some(store) = &store {
                tokio::fs::create_dir_all(&run_dir).await?;
                let failed = store.download_prefix(run_id.as_str(), &run_dir).await?;
                for key in &failed {
                    warn!("Download failed for {}", key);
                }
            }
            let manifest = RunManifest::load(&run_dir).await?;
            RestoreSource::Manifest {
                manifest,
                dir: run_dir,
            }
        }
        None => RestoreSource::Directory {
            dir: dir.to_path_buf(),
        },
    };

    let report = orchestrator(adapter, None, deadline).run_restore(source).await?;
    Ok(report.is_clean())
}

async fn es_ls(config: ElasticConfig, repos: bool, snapshot: Option<String>) -> anyhow::Result<bool> {
    let has_repo = !config.repository.is_empty();
    let adapter = ElasticAdapter::new(config)?;

    if repos {
        for name in adapter.repositories().await? {
            println!("{name}");
        }
    } else if let Some(snapshot) = snapshot {
        for index in adapter.snapshot_indices(&snapshot).await? {
            println!("{index}");
        }
    } else if has_repo {
        for name in adapter.snapshots().await? {
            println!("{name}");
        }
    } else {
        return list_resources(&adapter).await;
    }
    Ok(true)
}

async fn es_restore(
    config: ElasticConfig,
    run: Option<String>,
    snapshot: Option<String>,
    deadline: Option<Duration>,
) -> anyhow::Result<bool> {
    // A backup run names its snapshot after the run id, so --run is just the
    // addressable spelling of --snapshot.
    let snapshot = match (run, snapshot) {
        (Some(run), None) => RunId::parse(&run)?.as_str().to_string(),
        (None, Some(snapshot)) => snapshot,
        _ => {
            return Err(BackupError::Config(
                "exactly one of --run or --snapshot is required".into(),
            )
            .into())
        }
    };

    let adapter = Arc::new(ElasticAdapter::new(config)?);
    let report = orchestrator(adapter, None, deadline)
        .run_restore(RestoreSource::Snapshot { snapshot })
        .await?;
    Ok(report.is_clean())
}

async fn es_repo(mut config: ElasticConfig, action: RepoAction) -> anyhow::Result<bool> {
    match action {
        RepoAction::Init { bucket, endpoint } => {
            config.bucket = bucket;
            config.endpoint = endpoint;
            ElasticAdapter::new(config)?.init_repository().await?;
        }
        RepoAction::Rm { force } => {
            ElasticAdapter::new(config)?.delete_repository(force).await?;
        }
    }
    Ok(true)
}

async fn grip_ls(config: GripConfig, vertex: bool, edge: bool) -> anyhow::Result<bool> {
    let graph = config.graph.clone();
    let adapter = GripAdapter::new(config)?;

    // Neither flag means both kinds.
    let both = vertex == edge;
    if vertex || both {
        for element in adapter.query_elements(&graph, ElementKind::Vertex).await? {
            println!("{element}");
        }
    }
    if edge || both {
        for element in adapter.query_elements(&graph, ElementKind::Edge).await? {
            println!("{element}");
        }
    }
    Ok(true)
}

async fn s3_command(target: S3TargetArgs, action: S3Action) -> anyhow::Result<bool> {
    let store = target.store()?;

    match action {
        S3Action::Ls { prefix } => {
            for key in store.list(&prefix).await? {
                println!("{key}");
            }
            Ok(true)
        }
        S3Action::Upload { dir, run } => {
            let prefix = match run {
                Some(run) => run,
                None => dir
                    .dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        BackupError::Config("cannot derive a prefix from --dir".into())
                    })?,
            };
            let failed = store.upload_dir(&dir.dir, &prefix).await?;
            for key in &failed {
                println!("  failed  {key}");
            }
            Ok(failed.is_empty())
        }
        S3Action::Download { dir, run } => {
            let run_dir = dir.dir.join(&run);
            tokio::fs::create_dir_all(&run_dir).await?;
            let failed = store.download_prefix(&run, &run_dir).await?;
            for key in &failed {
                println!("  failed  {key}");
            }
            Ok(failed.is_empty())
        }
    }
}
