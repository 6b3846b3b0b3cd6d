use super::snapshot::{Entry, Fingerprint, Snapshot, ancestors};

/// A single remote mutation derived from comparing two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mkdir {
        path: String,
    },
    Upload {
        path: String,
        fingerprint: Fingerprint,
    },
    Delete {
        path: String,
    },
}

impl Operation {
    pub fn path(&self) -> &str {
        match self {
            Operation::Mkdir { path }
            | Operation::Upload { path, .. }
            | Operation::Delete { path } => path,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Operation::Mkdir { .. } => "mkdir",
            Operation::Upload { .. } => "upload",
            Operation::Delete { .. } => "delete",
        }
    }
}

/// Pure diff of two snapshots into the ordered operation sequence.
///
/// Order: deletes for paths whose kind flipped (the one case where a delete
/// must precede a create), then mkdirs, then uploads, then deletes for
/// vanished paths. Within each group paths are lexicographic, which puts
/// every parent directory ahead of its children. Vanished-path deletes are
/// pruned to the topmost deleted ancestor since remote deletes are
/// recursive.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<Operation> {
    let mut flip_deletes = Vec::new();
    let mut mkdirs = Vec::new();
    let mut uploads = Vec::new();

    for (path, entry) in new.iter() {
        match old.get(path) {
            None => push_create(&mut mkdirs, &mut uploads, path, entry),
            Some(previous) if previous.kind != entry.kind => {
                flip_deletes.push(Operation::Delete { path: path.clone() });
                push_create(&mut mkdirs, &mut uploads, path, entry);
            }
            Some(previous) => {
                if let (Some(was), Some(now)) = (&previous.fingerprint, &entry.fingerprint)
                    && !was.same_content(now)
                {
                    uploads.push(Operation::Upload {
                        path: path.clone(),
                        fingerprint: now.clone(),
                    });
                }
            }
        }
    }

    // Old paths that are gone, pruned to the topmost removed ancestor: the
    // remote delete is recursive, so a vanished or kind-flipped directory
    // already takes its whole subtree with it.
    let removed = |path: &str| match (old.get(path), new.get(path)) {
        (Some(_), None) => true,
        (Some(was), Some(now)) => was.kind != now.kind,
        _ => false,
    };
    let mut deletes = Vec::new();
    for (path, _) in old.iter() {
        if !removed(path) || ancestors(path).any(&removed) {
            continue;
        }
        if !new.contains(path) {
            deletes.push(Operation::Delete { path: path.clone() });
        }
        // Kind flips are removed too, but their delete is already queued
        // up front.
    }

    let mut operations = flip_deletes;
    operations.extend(mkdirs);
    operations.extend(uploads);
    operations.extend(deletes);
    operations
}

fn push_create(
    mkdirs: &mut Vec<Operation>,
    uploads: &mut Vec<Operation>,
    path: &str,
    entry: &Entry,
) {
    if entry.is_dir() {
        mkdirs.push(Operation::Mkdir {
            path: path.to_string(),
        });
    } else if let Some(fingerprint) = &entry.fingerprint {
        uploads.push(Operation::Upload {
            path: path.to_string(),
            fingerprint: fingerprint.clone(),
        });
    }
}
