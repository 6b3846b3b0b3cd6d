use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use tempfile::TempDir;
use ymirror_core::DiskError;

use crate::sync::backoff::Backoff;
use crate::sync::engine::MirrorEngine;
use crate::sync::remote::{RemoteEntry, RemoteError, RemoteStore};
use crate::sync::snapshot::{EntryKind, file_name};

mod part1;
mod part2;

/// In-memory remote that records every call and can be scripted to fail.
#[derive(Clone, Default)]
pub struct MockRemote {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    log: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    stat_entries: Mutex<HashMap<String, Option<RemoteEntry>>>,
}

impl MockRemote {
    pub fn fail_with(&self, key: &str, err: RemoteError) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn set_stat(&self, rel: &str, entry: Option<RemoteEntry>) {
        self.inner
            .stat_entries
            .lock()
            .unwrap()
            .insert(rel.to_string(), entry);
    }

    pub fn log(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Everything except stats, for order assertions.
    pub fn mutations(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|line| !line.starts_with("stat "))
            .collect()
    }

    fn hit(&self, key: String) -> Result<(), RemoteError> {
        self.inner.log.lock().unwrap().push(key.clone());
        if let Some(queue) = self.inner.failures.lock().unwrap().get_mut(&key)
            && let Some(err) = queue.pop_front()
        {
            return Err(err);
        }
        Ok(())
    }
}

impl RemoteStore for MockRemote {
    async fn ensure_folder(&self, rel: &str) -> Result<Option<String>, RemoteError> {
        self.hit(format!("mkdir {rel}"))?;
        Ok(Some(format!("id-{rel}")))
    }

    async fn put(&self, rel: &str, _source: &std::path::Path) -> Result<(), RemoteError> {
        self.hit(format!("put {rel}"))
    }

    async fn rename(&self, from_rel: &str, to_rel: &str) -> Result<(), RemoteError> {
        self.hit(format!("rename {from_rel} -> {to_rel}"))
    }

    async fn delete(&self, rel: &str, recursive: bool) -> Result<(), RemoteError> {
        self.hit(format!(
            "delete {rel}{}",
            if recursive { " recursive" } else { "" }
        ))
    }

    async fn stat(&self, rel: &str) -> Result<Option<RemoteEntry>, RemoteError> {
        self.hit(format!("stat {rel}"))?;
        if let Some(entry) = self.inner.stat_entries.lock().unwrap().get(rel) {
            return Ok(entry.clone());
        }
        Ok(Some(RemoteEntry {
            name: file_name(rel).to_string(),
            kind: EntryKind::File,
            size: None,
            md5: None,
            remote_id: Some(format!("rid-{rel}")),
            modified: None,
        }))
    }
}

pub fn transient() -> RemoteError {
    RemoteError::Api(DiskError::Api {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: "temporarily unavailable".into(),
        retry_after: None,
    })
}

pub fn rate_limited(retry_after: u64) -> RemoteError {
    RemoteError::Api(DiskError::Api {
        status: StatusCode::TOO_MANY_REQUESTS,
        message: "rate limited".into(),
        retry_after: Some(retry_after),
    })
}

pub fn auth_failure() -> RemoteError {
    RemoteError::Api(DiskError::Api {
        status: StatusCode::UNAUTHORIZED,
        message: "unauthorized".into(),
        retry_after: None,
    })
}

pub fn permanent() -> RemoteError {
    RemoteError::Api(DiskError::Api {
        status: StatusCode::BAD_REQUEST,
        message: "bad request".into(),
        retry_after: None,
    })
}

/// Engine wired for tests: serial execution, no backoff sleeps.
pub fn engine_for(remote: MockRemote, root: &TempDir) -> MirrorEngine<MockRemote> {
    MirrorEngine::new(remote, root.path())
        .with_retry(3, Backoff::new(Duration::ZERO, Duration::ZERO, false))
        .with_parallelism(1)
}
