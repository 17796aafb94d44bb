//! End-to-end workflow tests against the in-memory cloud.

mod common;

use common::{Harness, NO_HANG, file, folder, path};
use futures::future::join_all;
use oxcrypt_sync::metadata::MetadataStore;
use oxcrypt_sync::pipeline::TaskOutcome;
use oxcrypt_sync::testing::{CloudOperation, MemoryCloud};
use oxcrypt_sync::{CloudProviderError, CloudTask, LockingStrategy, SyncConfig, SyncError};
use std::time::Duration;
use tokio::time::timeout;

fn strategies() -> [SyncConfig; 2] {
    [
        SyncConfig::default(),
        SyncConfig::default().locking(LockingStrategy::PathLocks),
    ]
}

#[tokio::test]
async fn test_collision_renames_and_persists() {
    for config in strategies() {
        let h = Harness::new(config);
        h.cloud.insert_file(&path("/foo.txt"), &b"theirs"[..]);

        let mut item = file("/foo.txt").placeholder();
        h.metadata.cache(&mut item).unwrap();
        let id = item.id.unwrap();

        let outcome = h
            .factory
            .execute(CloudTask::upload(item, &b"ours"[..]))
            .await
            .unwrap();

        let TaskOutcome::Uploaded(uploaded) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(uploaded.cloud_path, path("/foo (1).txt"));
        assert_eq!(uploaded.name, "foo (1).txt");
        assert!(!uploaded.is_placeholder);

        // Persisted under the new name, both sides intact
        let stored = h.metadata.get(id).unwrap();
        assert_eq!(stored.cloud_path, path("/foo (1).txt"));
        assert_eq!(h.cloud.contents(&path("/foo.txt")).unwrap(), &b"theirs"[..]);
        assert_eq!(h.cloud.contents(&path("/foo (1).txt")).unwrap(), &b"ours"[..]);

        assert_eq!(h.cloud.call_count(CloudOperation::Store), 2);
        assert_eq!(h.factory.metrics().snapshot().collision_retries, 1);
    }
}

#[tokio::test]
async fn test_collision_retry_is_single_shot() {
    let h = Harness::new(SyncConfig::default());
    h.cloud.insert_file(&path("/foo.txt"), &b""[..]);
    h.cloud.insert_file(&path("/foo (1).txt"), &b""[..]);

    let mut item = file("/foo.txt").placeholder();
    h.metadata.cache(&mut item).unwrap();
    let id = item.id.unwrap();

    let err = h
        .factory
        .execute(CloudTask::upload(item, &b"x"[..]))
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::AlreadyExists { path: path("/foo (1).txt") });
    assert_eq!(h.cloud.call_count(CloudOperation::Store), 2);

    // The rename was persisted before the retry failed
    assert_eq!(h.metadata.get(id).unwrap().name, "foo (1).txt");
}

#[tokio::test]
async fn test_folder_collision() {
    let h = Harness::new(SyncConfig::default());
    h.cloud.insert_folder(&path("/docs"));

    let outcome = h
        .factory
        .execute(CloudTask::create_folder(folder("/docs").placeholder()))
        .await
        .unwrap();
    assert_eq!(outcome.item().unwrap().cloud_path, path("/docs (1)"));
    assert!(h.cloud.exists(&path("/docs (1)")));
}

#[tokio::test]
async fn test_reads_are_never_renamed() {
    let h = Harness::new(SyncConfig::default());
    h.cloud.fail_next(
        CloudOperation::Fetch,
        CloudProviderError::ItemAlreadyExists { path: path("/a.txt") },
    );
    let err = h.factory.execute(CloudTask::download(file("/a.txt"))).await.unwrap_err();
    assert_eq!(err, SyncError::AlreadyExists { path: path("/a.txt") });
    assert_eq!(h.cloud.call_count(CloudOperation::Fetch), 1);
}

#[tokio::test]
async fn test_error_mapping_round_trip() {
    let cases = [
        (CloudProviderError::ItemNotFound { path: path("/a.txt") }, SyncError::NotFound { path: path("/a.txt") }),
        (
            CloudProviderError::ItemAlreadyExists { path: path("/a.txt") },
            SyncError::AlreadyExists { path: path("/a.txt") },
        ),
        (
            CloudProviderError::ParentFolderDoesNotExist { path: path("/a.txt") },
            SyncError::ParentMissing { path: path("/a.txt") },
        ),
        (
            CloudProviderError::ItemTypeMismatch { path: path("/a.txt") },
            SyncError::TypeMismatch { path: path("/a.txt") },
        ),
        (CloudProviderError::NoInternetConnection, SyncError::Unreachable),
        (CloudProviderError::Unauthorized, SyncError::Unauthorized),
        (CloudProviderError::QuotaInsufficient, SyncError::QuotaExceeded),
        (CloudProviderError::PageTokenInvalid, SyncError::StaleContinuationToken),
        (
            CloudProviderError::Other("backend exploded".into()),
            SyncError::Cloud(CloudProviderError::Other("backend exploded".into())),
        ),
    ];
    for (injected, expected) in cases {
        let h = Harness::new(SyncConfig::default());
        h.cloud.insert_file(&path("/a.txt"), &b""[..]);
        h.cloud.fail_next(CloudOperation::Fetch, injected);
        let err = h.factory.execute(CloudTask::download(file("/a.txt"))).await.unwrap_err();
        assert_eq!(err, expected);
    }
}

#[tokio::test]
async fn test_enumeration_pages() {
    let h = Harness::with_cloud(SyncConfig::default(), MemoryCloud::new().with_page_size(2));
    for name in ["a", "b", "c"] {
        h.cloud.insert_file(&path("/dir").join(name), &b""[..]);
    }

    let first = h.factory.execute(CloudTask::enumerate(folder("/dir"), None)).await.unwrap();
    let TaskOutcome::Listed(first) = first else {
        panic!("unexpected outcome {first:?}");
    };
    let token = first.next_page_token.clone().unwrap();

    let second = h
        .factory
        .execute(CloudTask::enumerate(folder("/dir"), Some(token)))
        .await
        .unwrap();
    assert!(matches!(second, TaskOutcome::Listed(ref list) if list.items.len() == 1 && list.next_page_token.is_none()));

    let err = h
        .factory
        .execute(CloudTask::enumerate(folder("/dir"), Some("99".into())))
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::StaleContinuationToken);
}

#[tokio::test]
async fn test_identical_move_does_not_deadlock() {
    for config in strategies() {
        let h = Harness::new(config);
        h.cloud.insert_file(&path("/a/x.txt"), &b""[..]);

        let task = CloudTask::reparent(file("/a/x.txt"), path("/a/x.txt")).unwrap();
        let outcome = timeout(NO_HANG, h.factory.execute(task))
            .await
            .expect("identical move deadlocked")
            .unwrap();
        assert!(matches!(outcome, TaskOutcome::Moved(_)));
        assert_eq!(h.factory.graph().node_count(), 0);
        assert_eq!(h.factory.locks().metrics().snapshot().outstanding_locks(), 0);
    }
}

#[tokio::test]
async fn test_ancestor_moves_are_rejected_before_locking() {
    let h = Harness::new(SyncConfig::default());
    h.cloud.insert_folder(&path("/a/b"));

    let err = CloudTask::reparent(folder("/a"), path("/a/b/a")).unwrap_err();
    assert_eq!(err, SyncError::InvalidMove { from: path("/a"), to: path("/a/b/a") });

    let err = CloudTask::reparent(folder("/a/b"), path("/a")).unwrap_err();
    assert!(matches!(err, SyncError::InvalidMove { .. }));

    assert!(h.cloud.operations().is_empty());
    assert_eq!(h.factory.metrics().snapshot().lock_grants, 0);
    assert_eq!(h.factory.metrics().snapshot().nodes_created, 0);
}

#[tokio::test]
async fn test_move_renames_on_collision() {
    let h = Harness::new(SyncConfig::default());
    h.cloud.insert_file(&path("/a/x.txt"), &b"moved"[..]);
    h.cloud.insert_file(&path("/b/x.txt"), &b"existing"[..]);

    let task = CloudTask::reparent(file("/a/x.txt"), path("/b/x.txt")).unwrap();
    let outcome = h.factory.execute(task).await.unwrap();
    assert_eq!(outcome.item().unwrap().cloud_path, path("/b/x (1).txt"));
    assert_eq!(h.cloud.contents(&path("/b/x (1).txt")).unwrap(), &b"moved"[..]);
    assert!(!h.cloud.exists(&path("/a/x.txt")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_paths_run_in_parallel() {
    for config in strategies() {
        let cloud = MemoryCloud::new().with_latency(Duration::from_millis(100));
        let h = Harness::with_cloud(config, cloud);

        let handles: Vec<_> = ["/w", "/x", "/y", "/z"]
            .into_iter()
            .map(|p| h.factory.submit(CloudTask::create_folder(folder(p).placeholder())).unwrap())
            .collect();
        for result in timeout(NO_HANG, join_all(handles)).await.unwrap() {
            result.unwrap().unwrap();
        }
        assert_eq!(h.cloud.peak_in_flight(CloudOperation::CreateFolder), 4);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_writes_are_serialized() {
    for config in strategies() {
        let cloud = MemoryCloud::new().with_latency(Duration::from_millis(30));
        let h = Harness::with_cloud(config, cloud);
        h.cloud.insert_file(&path("/a/b/c.txt"), &b""[..]);

        let handles = vec![
            h.factory.submit(CloudTask::delete(file("/a/b/c.txt"))).unwrap(),
            h.factory.submit(CloudTask::delete(folder("/a/b"))).unwrap(),
            h.factory.submit(CloudTask::delete(folder("/a"))).unwrap(),
        ];
        let results = timeout(NO_HANG, join_all(handles)).await.unwrap();
        assert_eq!(h.cloud.peak_in_flight(CloudOperation::Delete), 1);
        assert!(results.iter().any(|r| matches!(r, Ok(Ok(TaskOutcome::Deleted)))));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_parallelism_is_bounded() {
    for limit in [1, 3] {
        let cloud = MemoryCloud::new().with_latency(Duration::from_millis(20));
        let h = Harness::with_cloud(SyncConfig::default().max_parallel_uploads(limit), cloud);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let item = file(&format!("/f{i}.txt")).placeholder();
                h.factory.submit(CloudTask::upload(item, &b"data"[..])).unwrap()
            })
            .collect();
        for result in timeout(NO_HANG, join_all(handles)).await.unwrap() {
            result.unwrap().unwrap();
        }
        let peak = h.cloud.peak_in_flight(CloudOperation::Store);
        assert!(peak <= limit, "peak {peak} exceeds limit {limit}");
        assert_eq!(h.factory.scheduler().available(oxcrypt_sync::pipeline::WorkflowConstraint::UploadConstrained), Some(limit));
    }
}

#[tokio::test]
async fn test_failed_writer_does_not_block_reader() {
    for config in strategies() {
        let h = Harness::new(config);
        h.cloud.insert_file(&path("/a.txt"), &b"v1"[..]);
        h.cloud.fail_next(CloudOperation::Store, CloudProviderError::NoInternetConnection);

        let writer = h.factory.submit(CloudTask::upload(file("/a.txt"), &b"v2"[..])).unwrap();
        let reader = h.factory.submit(CloudTask::download(file("/a.txt"))).unwrap();

        assert_eq!(writer.await.unwrap().unwrap_err(), SyncError::Unreachable);
        let outcome = timeout(NO_HANG, reader).await.unwrap().unwrap().unwrap();
        assert!(matches!(outcome, TaskOutcome::Downloaded { contents, .. } if contents == &b"v1"[..]));
    }
}

#[tokio::test]
async fn test_lock_timeout_fails_closed() {
    let config = SyncConfig::default().lock_timeout(Duration::from_millis(50));

    // Dependency graph: an unreleased writer node at the path
    let h = Harness::new(config.clone());
    h.cloud.insert_file(&path("/a.txt"), &b""[..]);
    let blocker = h.factory.graph().create_subgraph_for_writing(&path("/a.txt"));
    let err = h.factory.execute(CloudTask::download(file("/a.txt"))).await.unwrap_err();
    assert!(matches!(err, SyncError::LockTimeout { .. }));
    assert_eq!(h.cloud.call_count(CloudOperation::Fetch), 0);
    drop(blocker);
    assert_eq!(h.factory.graph().node_count(), 0);

    // Path locks: a held write lock on the data class
    let h = Harness::new(config.locking(LockingStrategy::PathLocks));
    h.cloud.insert_file(&path("/a.txt"), &b""[..]);
    let held = h
        .factory
        .locks()
        .acquire_write(path("/a.txt"), oxcrypt_sync::LockClass::Data)
        .await;
    let err = h.factory.execute(CloudTask::download(file("/a.txt"))).await.unwrap_err();
    assert!(matches!(err, SyncError::LockTimeout { .. }));
    assert_eq!(h.cloud.call_count(CloudOperation::Fetch), 0);
    // Only the blocker's lock remains
    assert_eq!(h.factory.metrics().snapshot().outstanding_locks(), 1);
    held.release();
    assert_eq!(h.factory.metrics().snapshot().outstanding_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_aborted_workflow_releases_locks() {
    for config in strategies() {
        let cloud = MemoryCloud::new().with_latency(Duration::from_secs(60));
        let h = Harness::with_cloud(config, cloud);
        h.cloud.insert_file(&path("/a.txt"), &b""[..]);

        let stuck = h.factory.submit(CloudTask::delete(file("/a.txt"))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());

        // The path is free again, so a new workflow can take its locks
        let next = h.factory.create(CloudTask::delete(file("/a.txt"))).unwrap();
        drop(next);
        assert_eq!(h.factory.metrics().snapshot().outstanding_locks(), 0);
        assert_eq!(h.factory.graph().node_count(), 0);
    }
}

#[tokio::test]
async fn test_scheduler_close_rejects_constrained_workflows() {
    let h = Harness::new(SyncConfig::default());
    h.cloud.insert_file(&path("/a.txt"), &b""[..]);
    h.factory.scheduler().close();

    let err = h.factory.execute(CloudTask::download(file("/a.txt"))).await.unwrap_err();
    assert_eq!(err, SyncError::SchedulerClosed);
    assert_eq!(h.factory.graph().node_count(), 0);

    h.factory.execute(CloudTask::delete(file("/a.txt"))).await.unwrap();
}
