use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::snapshot::Snapshot;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported state file version: {0}")]
    UnsupportedVersion(u32),
}

#[derive(Deserialize)]
struct StateFile {
    version: u32,
    snapshot: Snapshot,
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    version: u32,
    snapshot: &'a Snapshot,
}

/// Persists the committed snapshot between runs. The file is written next
/// to its final location and renamed into place, so a crash mid-commit
/// leaves the previous snapshot visible, never a torn one.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<Snapshot>, StateError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: StateFile = serde_json::from_slice(&bytes)?;
        if file.version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(file.version));
        }
        Ok(Some(file.snapshot))
    }

    pub async fn commit(&self, snapshot: &Snapshot) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(&StateFileRef {
            version: STATE_VERSION,
            snapshot,
        })?;

        let partial = partial_path(&self.path);
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, &self.path).await?;
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

/// Default location under the user data directory.
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("ymirror").join("snapshot.json"))
}
