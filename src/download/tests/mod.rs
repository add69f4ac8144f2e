use std::path::PathBuf;
use std::time::Duration;

use crate::download::QueueItem;
use crate::download::test_helpers::{
    create_test_manager, dir_entry, file_entry, wait_for,
};
use crate::error::EngineError;
use crate::store::{DownloadUpdate, NewDownloadJob};
use crate::types::{DownloadStatus, FAILED_ID_PREFIX};

#[tokio::test]
async fn test_download_file_submits_and_persists() {
    let (manager, engine, drive, _tmp) = create_test_manager().await;

    manager
        .download_file("ref-a", "movie.mkv", 104_857_600)
        .await
        .unwrap();

    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    // The engine accepted the job, so the row starts out active
    assert_eq!(job.status, DownloadStatus::Active);
    assert_eq!(job.name, "movie.mkv");
    assert_eq!(job.size, 104_857_600);
    assert!(job.parent_id.is_none());

    // A fresh URL was resolved and forwarded to the engine
    assert_eq!(drive.fetched.lock().await.as_slice(), ["ref-a"]);
    let submitted = engine.submitted.lock().await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "https://cdn.example.com/ref-a");
    assert_eq!(submitted[0].2, "movie.mkv");
}

#[tokio::test]
async fn test_rate_limited_submission_backs_off_and_retries() {
    let (manager, _engine, drive, _tmp) = create_test_manager().await;

    {
        let mut failures = drive.fetch_failures.lock().await;
        failures.push_back(EngineError::rate_limited("too many requests"));
        failures.push_back(EngineError::rate_limited("too many requests"));
    }

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();

    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    // Two throttled attempts plus the successful third
    assert_eq!(drive.fetched.lock().await.len(), 1);
    assert!(drive.fetch_failures.lock().await.is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_leave_failure_stub() {
    let (manager, _engine, drive, _tmp) = create_test_manager().await;
    let mut events = manager.subscribe();

    {
        let mut failures = drive.fetch_failures.lock().await;
        // max_retries defaults to 5: initial attempt plus five retries
        for _ in 0..6 {
            failures.push_back(EngineError::rate_limited("too many requests"));
        }
    }

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();

    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move {
            store
                .list_downloads()
                .await
                .unwrap()
                .iter()
                .any(|j| j.id.starts_with(FAILED_ID_PREFIX))
        }
    })
    .await;

    let jobs = manager.store.list_downloads().await.unwrap();
    let stub = jobs
        .iter()
        .find(|j| j.id.starts_with(FAILED_ID_PREFIX))
        .unwrap();
    assert_eq!(stub.status, DownloadStatus::Error);
    assert!(stub.error_message.as_deref().unwrap().contains("rate limited"));

    // The failure event names the stub row, so consumers can correlate
    let mut failed_id = None;
    while let Ok(event) = events.try_recv() {
        if let crate::types::Event::JobFailed { id, .. } = event {
            failed_id = Some(id);
        }
    }
    assert_eq!(failed_id.as_deref(), Some(stub.id.as_str()));
}

#[tokio::test]
async fn test_reconcile_updates_progress_and_eta() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    manager
        .download_file("ref-a", "movie.mkv", 104_857_600)
        .await
        .unwrap();
    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    // Engine reports 50 of 100 MiB at 5 MiB/s
    engine
        .set_status(
            "gid-1",
            DownloadStatus::Active,
            104_857_600,
            52_428_800,
            5_242_880,
        )
        .await;
    manager.reconcile_once().await.unwrap();

    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Active);
    assert_eq!(job.progress, 50.0);
    assert_eq!(job.speed, 5_242_880);
    assert_eq!(job.eta, Some(10));
}

#[tokio::test]
async fn test_completed_job_is_purged_from_engine_history() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;
    let mut events = manager.subscribe();

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();
    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    engine
        .set_status("gid-1", DownloadStatus::Complete, 100, 100, 0)
        .await;
    manager.reconcile_once().await.unwrap();

    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Complete);
    assert_eq!(job.progress, 100.0);
    assert_eq!(job.speed, 0);
    assert!(job.eta.is_none());
    assert!(job.completed_at.is_some());
    assert_eq!(engine.purged.lock().await.as_slice(), ["gid-1"]);

    let mut saw_complete = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, crate::types::Event::JobComplete { .. }) {
            saw_complete = true;
        }
    }
    assert!(saw_complete);
}

#[tokio::test]
async fn test_folder_download_enumerates_and_queues_children() {
    let (manager, engine, drive, _tmp) = create_test_manager().await;

    drive
        .add_folder(
            "root",
            vec![
                file_entry("ref-1", "a.bin", 100),
                file_entry("ref-2", "b.bin", 100),
                dir_entry("sub", "nested"),
            ],
        )
        .await;
    drive
        .add_folder("sub", vec![file_entry("ref-3", "c.bin", 100)])
        .await;

    let folder_id = manager.download_folder("root", "my-folder").await.unwrap();

    let store = manager.store.clone();
    let fid = folder_id.clone();
    wait_for(|| {
        let store = store.clone();
        let fid = fid.clone();
        async move { store.list_download_children(&fid).await.unwrap().len() == 3 }
    })
    .await;

    let folder = manager.store.get_download(&folder_id).await.unwrap().unwrap();
    assert_eq!(folder.total_files, 3);
    assert_eq!(folder.size, 300);
    assert!(!folder.is_enumerating);

    // The nested file lands under the nested local directory
    let submitted = engine.submitted.lock().await;
    assert!(submitted.iter().any(|(_, dir, name)| {
        name == "c.bin" && dir.ends_with("my-folder/nested")
    }));
}

#[tokio::test]
async fn test_folder_with_failed_child_aggregates_to_error() {
    let (manager, engine, drive, _tmp) = create_test_manager().await;

    drive
        .add_folder(
            "root",
            vec![
                file_entry("ref-1", "a.bin", 100),
                file_entry("ref-2", "b.bin", 100),
                file_entry("ref-3", "c.bin", 100),
            ],
        )
        .await;

    let folder_id = manager.download_folder("root", "my-folder").await.unwrap();
    let store = manager.store.clone();
    let fid = folder_id.clone();
    wait_for(|| {
        let store = store.clone();
        let fid = fid.clone();
        async move { store.list_download_children(&fid).await.unwrap().len() == 3 }
    })
    .await;

    engine
        .set_status("gid-1", DownloadStatus::Complete, 100, 100, 0)
        .await;
    engine
        .set_status("gid-2", DownloadStatus::Complete, 100, 100, 0)
        .await;
    engine.set_failed("gid-3", "disk full").await;
    manager.reconcile_once().await.unwrap();

    let folder = manager.store.get_download(&folder_id).await.unwrap().unwrap();
    assert_eq!(folder.status, DownloadStatus::Error);
    assert_eq!(folder.completed_files, 2);
    assert_eq!(folder.failed_files, 1);
    assert_eq!(folder.error_message.as_deref(), Some("1 file(s) failed"));
    assert!(folder.completed_at.is_some());
}

#[tokio::test]
async fn test_empty_folder_resolves_immediately() {
    let (manager, _engine, drive, _tmp) = create_test_manager().await;

    drive.add_folder("root", vec![]).await;
    let folder_id = manager.download_folder("root", "empty").await.unwrap();

    let folder = manager.store.get_download(&folder_id).await.unwrap().unwrap();
    assert_eq!(folder.status, DownloadStatus::Complete);
    assert_eq!(folder.total_files, 0);
    assert_eq!(folder.progress, 100.0);
}

#[tokio::test]
async fn test_enumeration_cap_fails_folder_without_queueing() {
    let (manager, engine, drive, tmp) = create_test_manager().await;

    // Rebuild the manager with a two-entry cap
    let mut config = crate::download::test_helpers::fast_config(&tmp.path().join("downloads"));
    config.enumeration.max_entries = 2;
    let manager = crate::download::DownloadManager::new(
        manager.store.clone(),
        engine.clone(),
        drive.clone(),
        std::sync::Arc::new(config),
    );

    drive
        .add_folder(
            "root",
            vec![
                file_entry("ref-1", "a.bin", 100),
                file_entry("ref-2", "b.bin", 100),
                file_entry("ref-3", "c.bin", 100),
            ],
        )
        .await;

    let result = manager.download_folder("root", "huge").await;
    assert!(result.is_err());

    // The folder record is failed and nothing was submitted
    let jobs = manager.store.list_downloads().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, DownloadStatus::Error);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.submitted.lock().await.is_empty());
}

#[tokio::test]
async fn test_pause_folder_pauses_children_and_zeros_speed() {
    let (manager, engine, drive, _tmp) = create_test_manager().await;

    drive
        .add_folder(
            "root",
            vec![
                file_entry("ref-1", "a.bin", 100),
                file_entry("ref-2", "b.bin", 100),
            ],
        )
        .await;
    let folder_id = manager.download_folder("root", "my-folder").await.unwrap();
    let store = manager.store.clone();
    let fid = folder_id.clone();
    wait_for(|| {
        let store = store.clone();
        let fid = fid.clone();
        async move { store.list_download_children(&fid).await.unwrap().len() == 2 }
    })
    .await;

    manager.pause(&folder_id).await.unwrap();

    assert_eq!(engine.paused.lock().await.len(), 2);
    let folder = manager.store.get_download(&folder_id).await.unwrap().unwrap();
    assert_eq!(folder.status, DownloadStatus::Paused);
    assert_eq!(folder.speed, 0);
    for child in manager.store.list_download_children(&folder_id).await.unwrap() {
        assert_eq!(child.status, DownloadStatus::Paused);
        assert_eq!(child.speed, 0);
    }

    manager.resume(&folder_id).await.unwrap();
    assert_eq!(engine.unpaused.lock().await.len(), 2);
}

#[tokio::test]
async fn test_remove_folder_cascades_and_scrubs_queue() {
    let (manager, engine, drive, _tmp) = create_test_manager().await;

    drive
        .add_folder(
            "root",
            vec![
                file_entry("ref-1", "a.bin", 100),
                file_entry("ref-2", "b.bin", 100),
            ],
        )
        .await;
    let folder_id = manager.download_folder("root", "my-folder").await.unwrap();
    let store = manager.store.clone();
    let fid = folder_id.clone();
    wait_for(|| {
        let store = store.clone();
        let fid = fid.clone();
        async move { store.list_download_children(&fid).await.unwrap().len() == 2 }
    })
    .await;

    manager.remove(&folder_id).await.unwrap();

    assert!(manager.store.list_downloads().await.unwrap().is_empty());
    // Both children were force-removed and purged on the engine
    assert_eq!(engine.removed.lock().await.len(), 2);
    assert_eq!(engine.purged.lock().await.len(), 2);
}

#[tokio::test]
async fn test_retry_failed_leaf_requeues_under_new_handle() {
    let (manager, _engine, _drive, _tmp) = create_test_manager().await;

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();
    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    manager
        .store
        .update_download(
            "gid-1",
            &DownloadUpdate {
                status: Some(DownloadStatus::Error),
                error_message: Some(Some("disk full".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    manager.retry("gid-1").await.unwrap();

    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-2").await.unwrap().is_some() }
    })
    .await;

    // The old record is gone, the retried one starts clean
    assert!(manager.store.get_download("gid-1").await.unwrap().is_none());
    let job = manager.store.get_download("gid-2").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Active);
    assert_eq!(job.progress, 0.0);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn test_recovery_resubmits_incomplete_jobs() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    // A job left behind by a previous process
    manager
        .store
        .upsert_download(&NewDownloadJob {
            id: "stale-gid".to_string(),
            name: "a.bin".to_string(),
            source_ref: "ref-a".to_string(),
            dest_path: "/downloads".to_string(),
            status: DownloadStatus::Active,
            size: 100,
            parent_id: None,
            error_message: None,
        })
        .await
        .unwrap();

    let recovered = manager.recover().await.unwrap();
    assert_eq!(recovered, 1);

    assert!(manager.store.get_download("stale-gid").await.unwrap().is_none());
    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Active);
    assert_eq!(job.source_ref, "ref-a");
    assert_eq!(engine.submitted.lock().await.len(), 1);
}

#[tokio::test]
async fn test_recovery_re_pauses_previously_paused_jobs() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    manager
        .store
        .upsert_download(&NewDownloadJob {
            id: "stale-gid".to_string(),
            name: "a.bin".to_string(),
            source_ref: "ref-a".to_string(),
            dest_path: "/downloads".to_string(),
            status: DownloadStatus::Waiting,
            size: 100,
            parent_id: None,
            error_message: None,
        })
        .await
        .unwrap();
    manager
        .store
        .update_download(
            "stale-gid",
            &DownloadUpdate {
                status: Some(DownloadStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    manager.recover().await.unwrap();

    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Paused);
    assert_eq!(engine.paused.lock().await.as_slice(), ["gid-1"]);
}

#[tokio::test]
async fn test_recovery_fails_interrupted_enumeration() {
    let (manager, _engine, _drive, _tmp) = create_test_manager().await;

    manager
        .store
        .upsert_download(&NewDownloadJob {
            id: "folder-1-abc".to_string(),
            name: "partial".to_string(),
            source_ref: "root".to_string(),
            dest_path: "/downloads/partial".to_string(),
            status: DownloadStatus::Waiting,
            size: 0,
            parent_id: None,
            error_message: None,
        })
        .await
        .unwrap();
    manager
        .store
        .update_download(
            "folder-1-abc",
            &DownloadUpdate {
                is_enumerating: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    manager.recover().await.unwrap();

    let folder = manager
        .store
        .get_download("folder-1-abc")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(folder.status, DownloadStatus::Error);
    assert!(!folder.is_enumerating);
    assert!(
        folder
            .error_message
            .as_deref()
            .unwrap()
            .contains("interrupted")
    );
}

#[tokio::test]
async fn test_stats_counts_top_level_jobs() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();
    manager.download_file("ref-b", "b.bin", 100).await.unwrap();
    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.list_downloads().await.unwrap().len() == 2 }
    })
    .await;

    engine
        .set_status("gid-1", DownloadStatus::Active, 100, 50, 2_000)
        .await;
    engine
        .set_status("gid-2", DownloadStatus::Complete, 100, 100, 0)
        .await;
    manager.reconcile_once().await.unwrap();

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total_speed, 2_000);
}

#[tokio::test]
async fn test_batch_download_queues_files_and_folders() {
    let (manager, _engine, drive, _tmp) = create_test_manager().await;
    drive
        .add_folder(
            "f-1",
            vec![
                file_entry("ref-x", "x.bin", 100),
                file_entry("ref-y", "y.bin", 200),
            ],
        )
        .await;

    let folder_ids = manager
        .download_batch(&[
            crate::download::DownloadSelection::File {
                source_ref: "ref-a".to_string(),
                name: "standalone.bin".to_string(),
                size: 50,
            },
            crate::download::DownloadSelection::Folder {
                remote_folder_id: "f-1".to_string(),
                name: "photos".to_string(),
            },
        ])
        .await
        .unwrap();
    assert_eq!(folder_ids.len(), 1);

    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.list_downloads().await.unwrap().len() == 4 }
    })
    .await;

    let folder = manager
        .store
        .get_download(&folder_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(folder.total_files, 2);
    let children = manager
        .store
        .list_download_children(&folder_ids[0])
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn test_files_queued_under_paused_folder_submit_paused() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    // A folder paused while its files were still waiting to submit
    manager
        .store
        .upsert_download(&NewDownloadJob {
            id: "folder-1-abc".to_string(),
            name: "my-folder".to_string(),
            source_ref: "root".to_string(),
            dest_path: "/downloads/my-folder".to_string(),
            status: DownloadStatus::Paused,
            size: 200,
            parent_id: None,
            error_message: None,
        })
        .await
        .unwrap();
    manager
        .store
        .update_download(
            "folder-1-abc",
            &DownloadUpdate {
                total_files: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    {
        let mut queue = manager.queue.lock().await;
        for (source_ref, name) in [("ref-x", "a.bin"), ("ref-y", "b.bin")] {
            queue.push_back(QueueItem {
                source_ref: source_ref.to_string(),
                name: name.to_string(),
                size: 100,
                dest_dir: PathBuf::from("/downloads/my-folder"),
                retry_count: 0,
                parent_id: Some("folder-1-abc".to_string()),
            });
        }
    }
    manager.kick_queue();

    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move {
            store
                .list_download_children("folder-1-abc")
                .await
                .unwrap()
                .len()
                == 2
        }
    })
    .await;

    // Both files reached the engine and were paused there right away
    assert_eq!(engine.submitted.lock().await.len(), 2);
    assert_eq!(engine.paused.lock().await.len(), 2);
    for child in manager
        .store
        .list_download_children("folder-1-abc")
        .await
        .unwrap()
    {
        assert_eq!(child.status, DownloadStatus::Paused);
    }

    // Resuming the folder brings them back like any other paused child
    manager.resume("folder-1-abc").await.unwrap();
    assert_eq!(engine.unpaused.lock().await.len(), 2);
    for child in manager
        .store
        .list_download_children("folder-1-abc")
        .await
        .unwrap()
    {
        assert_eq!(child.status, DownloadStatus::Active);
    }
}

#[tokio::test]
async fn test_paused_job_still_reconciles_terminal_engine_state() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();
    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    manager.pause("gid-1").await.unwrap();
    engine
        .set_status("gid-1", DownloadStatus::Complete, 100, 100, 0)
        .await;
    manager.reconcile_once().await.unwrap();

    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Complete);
    assert_eq!(job.progress, 100.0);
}

#[tokio::test]
async fn test_engine_progress_report_cannot_unpause_job() {
    let (manager, engine, _drive, _tmp) = create_test_manager().await;

    manager.download_file("ref-a", "a.bin", 100).await.unwrap();
    let store = manager.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move { store.get_download("gid-1").await.unwrap().is_some() }
    })
    .await;

    manager.pause("gid-1").await.unwrap();
    // An in-flight progress report from before the pause
    engine
        .set_status("gid-1", DownloadStatus::Active, 100, 50, 1_000)
        .await;
    manager.reconcile_once().await.unwrap();

    let job = manager.store.get_download("gid-1").await.unwrap().unwrap();
    assert_eq!(job.status, DownloadStatus::Paused);
    assert_eq!(job.speed, 0);
}
