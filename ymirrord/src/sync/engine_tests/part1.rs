use tempfile::tempdir;

use super::{MockRemote, engine_for};
use crate::sync::snapshot::Snapshot;

#[tokio::test]
async fn first_cycle_creates_dirs_then_uploads() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("a")).unwrap();
    std::fs::write(root.path().join("a/b.txt"), b"hi").unwrap();
    std::fs::write(root.path().join("c.txt"), b"top").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(
        remote.mutations(),
        vec!["mkdir a", "put a/b.txt", "put c.txt"]
    );
    assert_eq!(outcome.stats.dirs_created, 1);
    assert_eq!(outcome.stats.files_uploaded, 2);
    assert_eq!(outcome.stats.deleted, 0);
    assert!(outcome.snapshot.contains("a"));
    assert!(outcome.snapshot.contains("a/b.txt"));
    assert!(outcome.snapshot.contains("c.txt"));
}

#[tokio::test]
async fn committed_snapshot_makes_second_cycle_a_noop() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("docs")).unwrap();
    std::fs::write(root.path().join("docs/a.txt"), b"one").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);

    let first = engine.run_cycle(&Snapshot::new()).await.unwrap();
    let ops_after_first = remote.log().len();

    let second = engine.run_cycle(&first.snapshot).await.unwrap();
    assert_eq!(remote.log().len(), ops_after_first);
    assert!(second.stats.is_noop());
    assert_eq!(second.snapshot, first.snapshot);
}

#[tokio::test]
async fn content_change_uploads_only_that_file() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"hi").unwrap();
    std::fs::write(root.path().join("b.txt"), b"same").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let first = engine.run_cycle(&Snapshot::new()).await.unwrap();

    std::fs::write(root.path().join("a.txt"), b"bye").unwrap();
    let second = engine.run_cycle(&first.snapshot).await.unwrap();

    let puts: Vec<_> = remote
        .log()
        .into_iter()
        .skip(2)
        .collect();
    assert_eq!(puts, vec!["put a.txt"]);
    assert_eq!(second.stats.files_uploaded, 1);
}

#[tokio::test]
async fn local_file_delete_issues_one_delete() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("a")).unwrap();
    std::fs::write(root.path().join("a/b.txt"), b"gone soon").unwrap();
    std::fs::write(root.path().join("a/keep.txt"), b"stay").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let first = engine.run_cycle(&Snapshot::new()).await.unwrap();

    std::fs::remove_file(root.path().join("a/b.txt")).unwrap();
    let second = engine.run_cycle(&first.snapshot).await.unwrap();

    let tail: Vec<_> = remote.log().into_iter().skip(3).collect();
    assert_eq!(tail, vec!["delete a/b.txt"]);
    assert_eq!(second.stats.deleted, 1);
    assert!(second.snapshot.contains("a"));
    assert!(!second.snapshot.contains("a/b.txt"));
}

#[tokio::test]
async fn folder_delete_is_one_recursive_delete() {
    let root = tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("gone/sub")).unwrap();
    std::fs::write(root.path().join("gone/x.txt"), b"1").unwrap();
    std::fs::write(root.path().join("gone/sub/y.txt"), b"2").unwrap();
    std::fs::write(root.path().join("stays.txt"), b"3").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let first = engine.run_cycle(&Snapshot::new()).await.unwrap();

    std::fs::remove_dir_all(root.path().join("gone")).unwrap();
    let second = engine.run_cycle(&first.snapshot).await.unwrap();

    let tail: Vec<_> = remote.log().into_iter().skip(5).collect();
    assert_eq!(tail, vec!["delete gone recursive"]);
    assert_eq!(second.stats.deleted, 1);
}

#[tokio::test]
async fn kind_flip_deletes_before_recreating() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("thing"), b"a file").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let first = engine.run_cycle(&Snapshot::new()).await.unwrap();

    std::fs::remove_file(root.path().join("thing")).unwrap();
    std::fs::create_dir(root.path().join("thing")).unwrap();
    std::fs::write(root.path().join("thing/inner.txt"), b"x").unwrap();
    engine.run_cycle(&first.snapshot).await.unwrap();

    let tail: Vec<_> = remote.log().into_iter().skip(1).collect();
    assert_eq!(
        tail,
        vec!["delete thing", "mkdir thing", "put thing/inner.txt"]
    );
}

#[tokio::test]
async fn empty_dirs_are_mirrored_by_default_and_pruned_on_request() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("empty")).unwrap();

    let mirroring = MockRemote::default();
    let engine = engine_for(mirroring.clone(), &root);
    engine.run_cycle(&Snapshot::new()).await.unwrap();
    assert_eq!(mirroring.mutations(), vec!["mkdir empty"]);

    let pruning = MockRemote::default();
    let engine = engine_for(pruning.clone(), &root).with_empty_dir_pruning(true);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();
    assert!(pruning.mutations().is_empty());
    assert!(!outcome.snapshot.contains("empty"));
}

#[tokio::test]
async fn mkdir_remote_ids_land_in_the_snapshot() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("docs")).unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(
        outcome.snapshot.get("docs").unwrap().remote_id.as_deref(),
        Some("id-docs")
    );
}

#[tokio::test]
async fn throttled_upload_is_disguised_then_renamed() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("movies")).unwrap();
    std::fs::write(root.path().join("movies/clip.mkv"), b"frames").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(
        remote.mutations(),
        vec![
            "mkdir movies",
            "put movies/clip.mkv.partial",
            "rename movies/clip.mkv.partial -> movies/clip.mkv"
        ]
    );
    assert_eq!(outcome.stats.files_uploaded, 1);
    assert!(engine.pending_uploads().is_empty());
}

#[tokio::test]
async fn missing_root_fails_the_scan_phase() {
    let root = tempdir().unwrap();
    let remote = MockRemote::default();
    let engine =
        crate::sync::engine::MirrorEngine::new(remote.clone(), root.path().join("nope"));

    let err = engine.run_cycle(&Snapshot::new()).await.expect_err("scan");
    assert!(matches!(err, crate::sync::engine::CycleError::Scan(_)));
    assert!(remote.log().is_empty());
}
