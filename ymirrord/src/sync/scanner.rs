use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;

use super::snapshot::{EntryKind, Fingerprint, Snapshot};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("watched root is not a readable directory: {}", .0.display())]
    RootUnavailable(PathBuf),
    #[error("I/O error while scanning: {0}")]
    Io(#[from] std::io::Error),
}

/// Walks the watched root and produces a fresh snapshot.
///
/// Regular files and directories only; symlinks are never followed. A child
/// that cannot be read is logged and skipped, an unavailable root fails the
/// scan. Files whose (size, mtime) match the previous snapshot keep their
/// recorded md5 instead of being re-read.
pub async fn scan(root: &Path, previous: &Snapshot) -> Result<Snapshot, ScanError> {
    let root_meta = tokio::fs::metadata(root)
        .await
        .map_err(|_| ScanError::RootUnavailable(root.to_path_buf()))?;
    if !root_meta.is_dir() {
        return Err(ScanError::RootUnavailable(root.to_path_buf()));
    }

    let mut snapshot = Snapshot::new();
    let mut stack: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if prefix.is_empty() => return Err(err.into()),
            Err(err) => {
                eprintln!(
                    "[ymirrord] scan: skipping unreadable directory {}: {err}",
                    dir.display()
                );
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    eprintln!(
                        "[ymirrord] scan: stopping listing of {}: {err}",
                        dir.display()
                    );
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str().map(str::to_string) else {
                eprintln!(
                    "[ymirrord] scan: skipping non-UTF-8 name under {}",
                    dir.display()
                );
                continue;
            };
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };

            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(err) => {
                    eprintln!("[ymirrord] scan: skipping {rel}: {err}");
                    continue;
                }
            };
            if file_type.is_symlink() {
                continue;
            }

            if file_type.is_dir() {
                if let Err(err) = snapshot.add_dir(&rel) {
                    eprintln!("[ymirrord] scan: skipping directory {rel}: {err}");
                    continue;
                }
                stack.push((entry.path(), rel));
            } else if file_type.is_file() {
                match fingerprint_file(&entry.path(), &rel, previous).await {
                    Ok(fingerprint) => {
                        if let Err(err) = snapshot.add_file(&rel, fingerprint) {
                            eprintln!("[ymirrord] scan: skipping file {rel}: {err}");
                        }
                    }
                    Err(err) => {
                        eprintln!("[ymirrord] scan: skipping unreadable file {rel}: {err}");
                    }
                }
            }
            // Sockets, fifos and device nodes have no mirror representation.
        }
    }

    Ok(snapshot)
}

async fn fingerprint_file(
    path: &Path,
    rel: &str,
    previous: &Snapshot,
) -> Result<Fingerprint, std::io::Error> {
    let meta = tokio::fs::metadata(path).await?;
    let size = meta.len();
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    if let Some(entry) = previous.get(rel)
        && entry.kind == EntryKind::File
        && let Some(known) = &entry.fingerprint
        && known.same_stat(size, modified)
    {
        return Ok(known.clone());
    }

    let bytes = tokio::fs::read(path).await?;
    Ok(Fingerprint {
        md5: format!("{:x}", md5::compute(&bytes)),
        size,
        modified,
    })
}
