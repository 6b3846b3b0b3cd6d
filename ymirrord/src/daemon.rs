use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use ymirror_core::DiskClient;

use crate::sync::backoff::Backoff;
use crate::sync::engine::{CycleError, CycleStats, DEFAULT_MAX_ATTEMPTS, MirrorEngine};
use crate::sync::mediatype::{MediaCategory, ThrottlePolicy};
use crate::sync::remote::DiskStore;
use crate::sync::snapshot::Snapshot;
use crate::sync::state::{SnapshotStore, default_state_path};
use crate::sync::transfer::{TransferClient, TransferConfig};

const DEFAULT_REMOTE_ROOT: &str = "disk:/Mirror";
const DEFAULT_POLL_SECS: u64 = 60;
const DEFAULT_UPLOAD_CONCURRENCY: u64 = 2;
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_THROTTLED_TYPES: &str = "archive,video,binary";
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct MirrorConfig {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub upload_concurrency: usize,
    pub throttled_types: BTreeSet<MediaCategory>,
    pub state_file: PathBuf,
    pub verify_uploads: bool,
    pub prune_empty_dirs: bool,
    pub api_timeout: Duration,
    pub upload_timeout: Duration,
    pub halt_on_auth_error: bool,
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let local_root = PathBuf::from(
            std::env::var("YMIRROR_LOCAL_DIR").context("YMIRROR_LOCAL_DIR is not set")?,
        );
        let remote_root = std::env::var("YMIRROR_REMOTE_DIR")
            .unwrap_or_else(|_| DEFAULT_REMOTE_ROOT.to_string());
        let poll_interval =
            Duration::from_secs(read_u64_env("YMIRROR_POLL_SECS", DEFAULT_POLL_SECS));
        let max_attempts =
            read_u64_env("YMIRROR_MAX_ATTEMPTS", u64::from(DEFAULT_MAX_ATTEMPTS)) as u32;
        let upload_concurrency =
            read_u64_env("YMIRROR_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY) as usize;
        let throttled_types = parse_throttled_types(
            &std::env::var("YMIRROR_THROTTLED_TYPES")
                .unwrap_or_else(|_| DEFAULT_THROTTLED_TYPES.to_string()),
        )?;
        let state_file = match std::env::var("YMIRROR_STATE_FILE") {
            Ok(value) => PathBuf::from(value),
            Err(_) => default_state_path()
                .context("no data directory available; set YMIRROR_STATE_FILE")?,
        };
        let verify_uploads = read_bool_env("YMIRROR_VERIFY_UPLOADS", false);
        let prune_empty_dirs = read_bool_env("YMIRROR_PRUNE_EMPTY_DIRS", false);
        let api_timeout = Duration::from_secs(read_u64_env(
            "YMIRROR_API_TIMEOUT_SECS",
            DEFAULT_API_TIMEOUT_SECS,
        ));
        let upload_timeout = Duration::from_secs(read_u64_env(
            "YMIRROR_UPLOAD_TIMEOUT_SECS",
            DEFAULT_UPLOAD_TIMEOUT_SECS,
        ));
        let halt_on_auth_error = read_bool_env("YMIRROR_HALT_ON_AUTH_ERROR", true);

        Ok(Self {
            local_root,
            remote_root,
            poll_interval,
            max_attempts,
            upload_concurrency,
            throttled_types,
            state_file,
            verify_uploads,
            prune_empty_dirs,
            api_timeout,
            upload_timeout,
            halt_on_auth_error,
        })
    }
}

pub struct MirrorRuntime {
    config: MirrorConfig,
    engine: MirrorEngine<DiskStore>,
    store: SnapshotStore,
    snapshot: Snapshot,
}

impl MirrorRuntime {
    pub async fn bootstrap(config: MirrorConfig) -> anyhow::Result<Self> {
        let root_meta = tokio::fs::metadata(&config.local_root)
            .await
            .with_context(|| {
                format!(
                    "watched root is unavailable: {}",
                    config.local_root.display()
                )
            })?;
        anyhow::ensure!(
            root_meta.is_dir(),
            "watched root is not a directory: {}",
            config.local_root.display()
        );

        let token = std::env::var("YMIRROR_TOKEN").context("YMIRROR_TOKEN is not set")?;
        let client = DiskClient::new_with_timeout(token, config.api_timeout)
            .context("failed to build API client")?;
        let info = client
            .get_disk_info()
            .await
            .context("token validation against the Disk API failed")?;
        eprintln!(
            "[ymirrord] authenticated: {} of {} bytes used remotely",
            info.used_space, info.total_space
        );

        let transfer = TransferClient::with_config(TransferConfig {
            upload_concurrency: config.upload_concurrency,
            upload_timeout: config.upload_timeout,
        })
        .context("failed to build transfer client")?;
        let remote = DiskStore::new(client, transfer, config.remote_root.clone());
        remote
            .ensure_root()
            .await
            .with_context(|| format!("failed to ensure remote root {}", config.remote_root))?;

        let engine = MirrorEngine::new(remote, config.local_root.clone())
            .with_policy(ThrottlePolicy::new(config.throttled_types.clone()))
            .with_retry(
                config.max_attempts,
                Backoff::new(BACKOFF_BASE, BACKOFF_CAP, true),
            )
            .with_parallelism(config.upload_concurrency)
            .with_upload_verification(config.verify_uploads)
            .with_empty_dir_pruning(config.prune_empty_dirs);

        let store = SnapshotStore::new(config.state_file.clone());
        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => {
                eprintln!(
                    "[ymirrord] loaded snapshot ({} entries) from {}",
                    snapshot.len(),
                    store.path().display()
                );
                snapshot
            }
            Ok(None) => Snapshot::new(),
            Err(err) => {
                eprintln!(
                    "[ymirrord] warning: state file unreadable, mirroring from scratch: {err}"
                );
                Snapshot::new()
            }
        };

        eprintln!(
            "[ymirrord] started: local_root={}, remote_root={}, poll={}s",
            config.local_root.display(),
            config.remote_root,
            config.poll_interval.as_secs()
        );
        Ok(Self {
            config,
            engine,
            store,
            snapshot,
        })
    }

    /// One reconciliation cycle. The fresh snapshot becomes the baseline
    /// only when the cycle fully converged.
    pub async fn run_once(&mut self) -> anyhow::Result<CycleStats> {
        let started = Instant::now();
        let outcome = self.engine.run_cycle(&self.snapshot).await?;
        if let Err(err) = self.store.commit(&outcome.snapshot).await {
            // The remote already converged; losing the state file only
            // costs re-uploads after a restart.
            eprintln!("[ymirrord] warning: could not persist snapshot: {err}");
        }
        self.snapshot = outcome.snapshot;
        let stats = outcome.stats;
        eprintln!(
            "[ymirrord] cycle converged in {:.1}s: {} dirs, {} uploads ({} resumed renames), {} deletes, {} skipped",
            started.elapsed().as_secs_f64(),
            stats.dirs_created,
            stats.files_uploaded,
            stats.renames_resumed,
            stats.deleted,
            stats.skipped
        );
        Ok(stats)
    }

    /// Cycles on the configured cadence until ctrl-c. A failed cycle keeps
    /// the previous snapshot and the loop carries on; an authentication
    /// failure halts when so configured.
    pub async fn run_forever(&mut self) -> anyhow::Result<()> {
        loop {
            let started = Instant::now();
            let halt_on_auth = self.config.halt_on_auth_error;
            let poll_interval = self.config.poll_interval;

            tokio::select! {
                result = self.run_once() => {
                    if let Err(err) = result {
                        if halt_on_auth && is_auth_error(&err) {
                            return Err(err.context("authentication failed, halting"));
                        }
                        eprintln!("[ymirrord] cycle failed, will retry next cycle: {err:#}");
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed waiting for shutdown signal")?;
                    eprintln!("[ymirrord] shutdown requested mid-cycle; previous snapshot retained");
                    return Ok(());
                }
            }

            let sleep_for = poll_interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed waiting for shutdown signal")?;
                    eprintln!("[ymirrord] shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

fn is_auth_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CycleError>()
        .map(CycleError::is_auth)
        .unwrap_or(false)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    parse_u64(std::env::var(name).ok(), default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    parse_bool(std::env::var(name).ok(), default)
}

fn parse_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn parse_throttled_types(raw: &str) -> anyhow::Result<BTreeSet<MediaCategory>> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            MediaCategory::parse(token)
                .with_context(|| format!("unknown media category in YMIRROR_THROTTLED_TYPES: {token}"))
        })
        .collect()
}
