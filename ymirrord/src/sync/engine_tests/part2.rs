use tempfile::tempdir;

use super::{MockRemote, auth_failure, engine_for, permanent, rate_limited, transient};
use crate::sync::engine::CycleError;
use crate::sync::remote::RemoteEntry;
use crate::sync::snapshot::{EntryKind, Snapshot};

#[tokio::test]
async fn transient_put_failure_retries_and_succeeds() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    remote.fail_with("put a.txt", transient());

    let engine = engine_for(remote.clone(), &root);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(remote.count("put a.txt"), 2);
    assert_eq!(outcome.stats.files_uploaded, 1);
}

#[tokio::test]
async fn retries_exhausted_abort_the_cycle() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    for _ in 0..3 {
        remote.fail_with("put a.txt", transient());
    }

    let engine = engine_for(remote.clone(), &root);
    let err = engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("expected exhausted retries");

    assert!(matches!(
        err,
        CycleError::RetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(remote.count("put a.txt"), 3);
}

#[tokio::test]
async fn auth_failure_aborts_without_retry() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    remote.fail_with("put a.txt", auth_failure());

    let engine = engine_for(remote.clone(), &root);
    let err = engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("expected auth failure");

    assert!(err.is_auth());
    assert_eq!(remote.count("put a.txt"), 1);
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    remote.fail_with("put a.txt", rate_limited(0));

    let engine = engine_for(remote.clone(), &root);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(remote.count("put a.txt"), 2);
    assert_eq!(outcome.stats.files_uploaded, 1);
}

#[tokio::test]
async fn permanent_failure_aborts_without_retry() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    remote.fail_with("put a.txt", permanent());

    let engine = engine_for(remote.clone(), &root);
    let err = engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("expected permanent failure");

    assert!(matches!(err, CycleError::Failed { .. }));
    assert_eq!(remote.count("put a.txt"), 1);
}

#[tokio::test]
async fn failed_rename_parks_a_pending_upload() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("clip.mkv"), b"frames").unwrap();

    let remote = MockRemote::default();
    for _ in 0..3 {
        remote.fail_with("rename clip.mkv.partial -> clip.mkv", transient());
    }

    let engine = engine_for(remote.clone(), &root);
    engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("rename must exhaust retries");

    assert_eq!(remote.count("put clip.mkv.partial"), 1);
    assert_eq!(remote.count("rename clip.mkv.partial -> clip.mkv"), 3);

    let pending = engine.pending_uploads();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].path, "clip.mkv");
    assert_eq!(pending[0].disguised, "clip.mkv.partial");
    assert!(pending[0].last_error.is_some());
}

#[tokio::test]
async fn next_cycle_resumes_the_rename_without_reupload() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("clip.mkv"), b"frames").unwrap();

    let remote = MockRemote::default();
    for _ in 0..3 {
        remote.fail_with("rename clip.mkv.partial -> clip.mkv", transient());
    }

    let engine = engine_for(remote.clone(), &root);
    engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("first cycle fails");

    // The failed cycle is never committed, so the baseline is still empty
    // and the same upload is re-derived; only the rename runs this time.
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(remote.count("put clip.mkv.partial"), 1);
    assert_eq!(remote.count("rename clip.mkv.partial -> clip.mkv"), 4);
    assert_eq!(outcome.stats.files_uploaded, 1);
    assert_eq!(outcome.stats.renames_resumed, 1);
    assert!(engine.pending_uploads().is_empty());
}

#[tokio::test]
async fn content_change_invalidates_the_pending_rename() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("clip.mkv"), b"v1").unwrap();

    let remote = MockRemote::default();
    for _ in 0..3 {
        remote.fail_with("rename clip.mkv.partial -> clip.mkv", transient());
    }

    let engine = engine_for(remote.clone(), &root);
    engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("first cycle fails");

    std::fs::write(root.path().join("clip.mkv"), b"v2 with new bytes").unwrap();
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    // Stale pending dropped: the new content goes through the full
    // disguise-then-rename sequence again.
    assert_eq!(remote.count("put clip.mkv.partial"), 2);
    assert_eq!(outcome.stats.renames_resumed, 0);
    assert_eq!(outcome.stats.files_uploaded, 1);
}

#[tokio::test]
async fn stale_disguised_object_falls_back_to_full_upload() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("clip.mkv"), b"frames").unwrap();

    let remote = MockRemote::default();
    for _ in 0..3 {
        remote.fail_with("rename clip.mkv.partial -> clip.mkv", transient());
    }

    let engine = engine_for(remote.clone(), &root);
    engine
        .run_cycle(&Snapshot::new())
        .await
        .expect_err("first cycle fails");

    // The resumed rename hits a permanent error (e.g. the disguised object
    // was garbage-collected remotely): re-upload instead of giving up.
    remote.fail_with("rename clip.mkv.partial -> clip.mkv", permanent());
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(remote.count("put clip.mkv.partial"), 2);
    assert_eq!(outcome.stats.files_uploaded, 1);
    assert!(engine.pending_uploads().is_empty());
}

#[tokio::test]
async fn name_mismatch_is_skipped_once_under_verification() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("weird:name.txt"), b"x").unwrap();
    std::fs::write(root.path().join("fine.txt"), b"y").unwrap();

    let remote = MockRemote::default();
    // The store never reports the path back: the name did not survive.
    remote.set_stat("weird:name.txt", None);

    let engine = engine_for(remote.clone(), &root).with_upload_verification(true);
    let first = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(first.stats.skipped, 1);
    assert_eq!(first.stats.files_uploaded, 1);
    assert_eq!(engine.skipped_paths(), vec!["weird:name.txt".to_string()]);

    // Converged snapshot commits; the next cycle does not touch the path.
    let puts_after_first = remote.count("put weird:name.txt");
    let second = engine.run_cycle(&first.snapshot).await.unwrap();
    assert!(second.stats.is_noop());
    assert_eq!(remote.count("put weird:name.txt"), puts_after_first);
}

#[tokio::test]
async fn mkdir_name_mismatch_shadows_the_subtree() {
    let root = tempdir().unwrap();
    std::fs::create_dir(root.path().join("bad:dir")).unwrap();
    std::fs::write(root.path().join("bad:dir/file.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    remote.set_stat(
        "bad:dir",
        Some(RemoteEntry {
            name: "bad_dir".into(),
            kind: EntryKind::Dir,
            size: None,
            md5: None,
            remote_id: None,
            modified: None,
        }),
    );

    let engine = engine_for(remote.clone(), &root).with_upload_verification(true);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(outcome.stats.skipped, 2);
    assert_eq!(remote.count("put bad:dir/file.txt"), 0);
    assert_eq!(engine.skipped_paths(), vec!["bad:dir".to_string()]);
}

#[tokio::test]
async fn verification_records_remote_ids_for_files() {
    let root = tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"x").unwrap();

    let remote = MockRemote::default();
    let engine = engine_for(remote.clone(), &root).with_upload_verification(true);
    let outcome = engine.run_cycle(&Snapshot::new()).await.unwrap();

    assert_eq!(
        outcome.snapshot.get("a.txt").unwrap().remote_id.as_deref(),
        Some("rid-a.txt")
    );
}
