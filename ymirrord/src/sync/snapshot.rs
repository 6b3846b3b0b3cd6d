use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Normalizes a mirror path to the canonical relative POSIX form used as the
/// snapshot key: `a/b.txt`, no leading or trailing slash, no `.`/`..`.
pub fn normalize(path: &str) -> Result<String, PathError> {
    if path.contains('\\') {
        return Err(PathError::UnsupportedComponent("\\".into()));
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::UnsupportedComponent("..".into())),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments.join("/"))
}

/// Final component of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// Proper ancestors of a normalized path, outermost first:
/// `a/b/c` yields `a`, then `a/b`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .filter(|(_, ch)| *ch == '/')
        .map(move |(idx, _)| &path[..idx])
}

/// True when `descendant` lies strictly below `path`.
pub fn is_strictly_under(path: &str, descendant: &str) -> bool {
    descendant.len() > path.len()
        && descendant.starts_with(path)
        && descendant.as_bytes()[path.len()] == b'/'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// Content identity of a local file. The md5 is authoritative; size and
/// mtime are kept so the scanner can skip re-hashing unchanged files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub md5: String,
    pub size: u64,
    pub modified: i64,
}

impl Fingerprint {
    pub fn same_content(&self, other: &Self) -> bool {
        self.md5 == other.md5
    }

    pub fn same_stat(&self, size: u64, modified: i64) -> bool {
        self.size == size && self.modified == modified
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub remote_id: Option<String>,
}

impl Entry {
    pub fn dir() -> Self {
        Self {
            kind: EntryKind::Dir,
            size: None,
            fingerprint: None,
            remote_id: None,
        }
    }

    pub fn file(fingerprint: Fingerprint) -> Self {
        Self {
            kind: EntryKind::File,
            size: Some(fingerprint.size),
            fingerprint: Some(fingerprint),
            remote_id: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Point-in-time record of the local tree: normalized relative path to
/// entry. The watched root itself is implicit and never stored. BTreeMap
/// keys give the deterministic, parent-before-child iteration order the
/// diff relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a directory, creating any missing ancestor directories.
    pub fn add_dir(&mut self, path: &str) -> Result<(), PathError> {
        let path = normalize(path)?;
        self.insert_with_ancestors(path, Entry::dir());
        Ok(())
    }

    /// Records a file, creating any missing ancestor directories.
    pub fn add_file(&mut self, path: &str, fingerprint: Fingerprint) -> Result<(), PathError> {
        let path = normalize(path)?;
        self.insert_with_ancestors(path, Entry::file(fingerprint));
        Ok(())
    }

    fn insert_with_ancestors(&mut self, path: String, entry: Entry) {
        for ancestor in ancestors(&path) {
            if !self.entries.contains_key(ancestor) {
                self.entries.insert(ancestor.to_string(), Entry::dir());
            }
        }
        self.entries.insert(path, entry);
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn set_remote_id(&mut self, path: &str, remote_id: Option<String>) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.remote_id = remote_id;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Carries remote ids forward from the previously committed snapshot
    /// for paths that still exist with the same kind. A fresh scan cannot
    /// know them; the store does not change an id on overwrite.
    pub fn inherit_remote_ids(&mut self, previous: &Snapshot) {
        for (path, entry) in self.entries.iter_mut() {
            if entry.remote_id.is_none()
                && let Some(known) = previous.get(path)
                && known.kind == entry.kind
            {
                entry.remote_id = known.remote_id.clone();
            }
        }
    }

    /// Copy with directories that contain no files anywhere beneath them
    /// removed. Used by the empty-folder pruning policy.
    pub fn without_empty_dirs(&self) -> Snapshot {
        let mut keep: BTreeSet<&str> = BTreeSet::new();
        for (path, entry) in &self.entries {
            if entry.is_dir() {
                continue;
            }
            for ancestor in ancestors(path) {
                keep.insert(ancestor);
            }
        }
        let entries = self
            .entries
            .iter()
            .filter(|(path, entry)| !entry.is_dir() || keep.contains(path.as_str()))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        Snapshot { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(md5: &str) -> Fingerprint {
        Fingerprint {
            md5: md5.into(),
            size: 1,
            modified: 1_700_000_000,
        }
    }

    #[test]
    fn normalize_strips_redundant_separators() {
        assert_eq!(normalize("/a//b/./c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize("a").unwrap(), "a");
    }

    #[test]
    fn normalize_rejects_parent_and_backslash() {
        assert!(matches!(
            normalize("../x"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            normalize("a\\b"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert_eq!(normalize(""), Err(PathError::Empty));
        assert_eq!(normalize("/"), Err(PathError::Empty));
    }

    #[test]
    fn add_file_creates_missing_ancestors() {
        let mut snapshot = Snapshot::new();
        snapshot.add_file("a/b/c.txt", fp("x")).unwrap();

        assert!(snapshot.get("a").unwrap().is_dir());
        assert!(snapshot.get("a/b").unwrap().is_dir());
        assert_eq!(snapshot.get("a/b/c.txt").unwrap().kind, EntryKind::File);
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn iteration_is_sorted_and_parents_come_first() {
        let mut snapshot = Snapshot::new();
        snapshot.add_file("b/z.txt", fp("1")).unwrap();
        snapshot.add_file("a/nested/deep.txt", fp("2")).unwrap();
        snapshot.add_dir("a/empty").unwrap();

        let paths: Vec<_> = snapshot.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            paths,
            vec!["a", "a/empty", "a/nested", "a/nested/deep.txt", "b", "b/z.txt"]
        );
    }

    #[test]
    fn ancestors_are_outermost_first() {
        let collected: Vec<_> = ancestors("a/b/c.txt").collect();
        assert_eq!(collected, vec!["a", "a/b"]);
        assert_eq!(ancestors("top.txt").count(), 0);
    }

    #[test]
    fn strictly_under_requires_a_separator() {
        assert!(is_strictly_under("a/b", "a/b/c.txt"));
        assert!(!is_strictly_under("a/b", "a/bc.txt"));
        assert!(!is_strictly_under("a/b", "a/b"));
    }

    #[test]
    fn inherit_remote_ids_respects_kind_changes() {
        let mut previous = Snapshot::new();
        previous.add_dir("docs").unwrap();
        previous.set_remote_id("docs", Some("rid-docs".into()));
        previous.add_file("flip", fp("old")).unwrap();
        previous.set_remote_id("flip", Some("rid-flip".into()));

        let mut fresh = Snapshot::new();
        fresh.add_dir("docs").unwrap();
        fresh.add_dir("flip").unwrap();
        fresh.inherit_remote_ids(&previous);

        assert_eq!(
            fresh.get("docs").unwrap().remote_id.as_deref(),
            Some("rid-docs")
        );
        // flip changed from file to dir: the old id does not apply.
        assert_eq!(fresh.get("flip").unwrap().remote_id, None);
    }

    #[test]
    fn without_empty_dirs_drops_fileless_subtrees() {
        let mut snapshot = Snapshot::new();
        snapshot.add_file("keep/file.txt", fp("1")).unwrap();
        snapshot.add_dir("empty").unwrap();
        snapshot.add_dir("nested/also/empty").unwrap();

        let pruned = snapshot.without_empty_dirs();
        assert!(pruned.contains("keep"));
        assert!(pruned.contains("keep/file.txt"));
        assert!(!pruned.contains("empty"));
        assert!(!pruned.contains("nested"));
        assert_eq!(pruned.len(), 2);
    }
}
