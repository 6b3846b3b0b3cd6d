use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use thiserror::Error;
use ymirror_core::ErrorClass;

use super::backoff::Backoff;
use super::diff::{Operation, diff};
use super::mediatype::ThrottlePolicy;
use super::remote::{RemoteError, RemoteStore};
use super::scanner::{ScanError, scan};
use super::snapshot::{Fingerprint, Snapshot, file_name, is_strictly_under};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_PARALLELISM: usize = 2;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("{op} {path}: giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        op: &'static str,
        path: String,
        attempts: u32,
        source: RemoteError,
    },
    #[error("{op} {path}: {source}")]
    Failed {
        op: &'static str,
        path: String,
        source: RemoteError,
    },
}

impl CycleError {
    pub fn classification(&self) -> Option<ErrorClass> {
        match self {
            CycleError::Scan(_) => None,
            CycleError::RetriesExhausted { source, .. } | CycleError::Failed { source, .. } => {
                Some(source.classification())
            }
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.classification(), Some(ErrorClass::Auth))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub dirs_created: usize,
    pub files_uploaded: usize,
    pub renames_resumed: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl CycleStats {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of a converged cycle: the snapshot to commit plus counters.
#[derive(Debug)]
pub struct CycleOutcome {
    pub snapshot: Snapshot,
    pub stats: CycleStats,
}

/// A disguised upload whose rename-in-place has not completed yet. Kept
/// across cycles so the next attempt retries the cheap rename before
/// re-sending the bytes.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub path: String,
    pub disguised: String,
    pub fingerprint: Fingerprint,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// The reconciliation scheduler. One `run_cycle` call is one full
/// scan → diff → execute pass; the previous snapshot goes in, the fresh
/// snapshot comes out, and the caller decides whether to commit it.
pub struct MirrorEngine<R> {
    remote: R,
    local_root: PathBuf,
    policy: ThrottlePolicy,
    backoff: Backoff,
    max_attempts: u32,
    parallelism: usize,
    verify_uploads: bool,
    prune_empty_dirs: bool,
    skipped: Mutex<BTreeSet<String>>,
    pending: Mutex<BTreeMap<String, PendingUpload>>,
}

impl<R: RemoteStore> MirrorEngine<R> {
    pub fn new(remote: R, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            local_root: local_root.into(),
            policy: ThrottlePolicy::default(),
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(30), true),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            parallelism: DEFAULT_PARALLELISM,
            verify_uploads: false,
            prune_empty_dirs: false,
            skipped: Mutex::new(BTreeSet::new()),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: ThrottlePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, backoff: Backoff) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_upload_verification(mut self, verify: bool) -> Self {
        self.verify_uploads = verify;
        self
    }

    pub fn with_empty_dir_pruning(mut self, prune: bool) -> Self {
        self.prune_empty_dirs = prune;
        self
    }

    /// Paths parked after a name round-trip mismatch.
    pub fn skipped_paths(&self) -> Vec<String> {
        self.skipped.lock().unwrap().iter().cloned().collect()
    }

    /// Disguised uploads still waiting for their rename.
    pub fn pending_uploads(&self) -> Vec<PendingUpload> {
        self.pending.lock().unwrap().values().cloned().collect()
    }

    /// Runs one reconciliation cycle against `previous`.
    ///
    /// On success the returned snapshot is the new baseline; any error
    /// means the caller must keep `previous` so the next cycle re-derives
    /// the remaining work.
    pub async fn run_cycle(&self, previous: &Snapshot) -> Result<CycleOutcome, CycleError> {
        let fresh = scan(&self.local_root, previous).await?;
        let mut fresh = if self.prune_empty_dirs {
            fresh.without_empty_dirs()
        } else {
            fresh
        };
        fresh.inherit_remote_ids(previous);
        let operations = diff(previous, &fresh);

        let mut stats = CycleStats::default();
        let mut snapshot = fresh;
        if operations.is_empty() {
            return Ok(CycleOutcome { snapshot, stats });
        }

        // Ordering-safe groups. A delete whose path is still in the fresh
        // snapshot is a kind flip and must land before the recreate; all
        // mkdirs precede all uploads; vanished-path deletes go last.
        let mut replacements: Vec<String> = Vec::new();
        let mut mkdirs: Vec<String> = Vec::new();
        let mut uploads: Vec<(String, Fingerprint)> = Vec::new();
        let mut deletes: Vec<String> = Vec::new();
        for op in operations {
            match op {
                Operation::Delete { path } => {
                    if snapshot.contains(&path) {
                        replacements.push(path);
                    } else {
                        deletes.push(path);
                    }
                }
                Operation::Mkdir { path } => mkdirs.push(path),
                Operation::Upload { path, fingerprint } => uploads.push((path, fingerprint)),
            }
        }
        eprintln!(
            "[ymirrord] cycle: {} mkdir, {} upload, {} delete",
            mkdirs.len(),
            uploads.len(),
            deletes.len() + replacements.len()
        );

        for path in &replacements {
            match self.execute_delete(path, previous).await? {
                ExecOutcome::Done { .. } => stats.deleted += 1,
                ExecOutcome::Skipped { .. } => stats.skipped += 1,
            }
        }

        for path in &mkdirs {
            match self.execute_mkdir(path).await? {
                ExecOutcome::Done { path, remote_id, .. } => {
                    snapshot.set_remote_id(&path, remote_id);
                    stats.dirs_created += 1;
                }
                ExecOutcome::Skipped { .. } => stats.skipped += 1,
            }
        }

        let mut upload_results = stream::iter(
            uploads
                .into_iter()
                .map(|(path, fingerprint)| self.execute_upload(path, fingerprint)),
        )
        .buffer_unordered(self.parallelism);
        while let Some(result) = upload_results.next().await {
            match result? {
                ExecOutcome::Done {
                    path,
                    remote_id,
                    resumed_rename,
                } => {
                    snapshot.set_remote_id(&path, remote_id);
                    stats.files_uploaded += 1;
                    if resumed_rename {
                        stats.renames_resumed += 1;
                    }
                }
                ExecOutcome::Skipped { .. } => stats.skipped += 1,
            }
        }
        drop(upload_results);

        let mut delete_results =
            stream::iter(deletes.iter().map(|path| self.execute_delete(path, previous)))
                .buffer_unordered(self.parallelism);
        while let Some(result) = delete_results.next().await {
            match result? {
                ExecOutcome::Done { .. } => stats.deleted += 1,
                ExecOutcome::Skipped { .. } => stats.skipped += 1,
            }
        }
        drop(delete_results);

        Ok(CycleOutcome { snapshot, stats })
    }
}

enum ExecOutcome {
    Done {
        path: String,
        remote_id: Option<String>,
        resumed_rename: bool,
    },
    Skipped {
        #[allow(dead_code)]
        path: String,
    },
}

enum VerifyResult {
    Accepted(Option<String>),
    NameMismatch,
}

include!("engine_ops.rs");

#[cfg(test)]
#[path = "engine_tests/mod.rs"]
mod tests;
