// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_fixtures::test_daemon;
use amon_core::EventKind;

#[test]
fn system_writes_window() {
    let writes = SystemWrites::default();
    let path = PathBuf::from("/p/docs/a.md");
    assert!(!writes.is_recent(&path));
    writes.record(path.clone());
    assert!(writes.is_recent(&path));
    assert!(!writes.is_recent(&PathBuf::from("/p/docs/b.md")));
}

#[test]
fn classify_maps_notify_kinds() {
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    assert_eq!(classify(&notify::EventKind::Create(CreateKind::File)), Some(FsChange::Created));
    assert_eq!(
        classify(&notify::EventKind::Modify(ModifyKind::Any)),
        Some(FsChange::Updated)
    );
    assert_eq!(classify(&notify::EventKind::Remove(RemoveKind::File)), Some(FsChange::Deleted));
    assert_eq!(classify(&notify::EventKind::Access(notify::event::AccessKind::Any)), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_doc_write_becomes_project_event() {
    let f = test_daemon();
    let sub = f.daemon.bus.subscribe(|e| e.kind.family() == "doc");

    let watcher = ProjectWatcher::new(
        Arc::clone(&f.daemon),
        f.project_id,
        SystemWrites::default(),
    )
    .unwrap();
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watcher.run(cancel).await })
    };
    // Give the watcher a moment to arm.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let docs = f.daemon.project_paths(&f.project_id).unwrap().docs_dir();
    std::fs::write(docs.join("external.md"), b"# note").unwrap();

    let mut seen = None;
    for _ in 0..100 {
        if let Some(event) = sub.try_recv() {
            seen = Some(event);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cancel.cancel();
    let _ = task.await;

    let event = seen.expect("doc event from watcher");
    assert!(matches!(event.kind, EventKind::DocCreated | EventKind::DocUpdated));
    assert_eq!(event.actor, "user");
    assert_eq!(event.payload["path"], "docs/external.md");
    assert!(event.dedupe_key.as_deref().unwrap_or("").starts_with("fs:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn system_written_paths_are_suppressed() {
    let f = test_daemon();
    let sub = f.daemon.bus.subscribe(|e| e.kind.family() == "doc");

    let docs = f.daemon.project_paths(&f.project_id).unwrap().docs_dir();
    let target = docs.join("system.md");

    let writes = SystemWrites::default();
    writes.record(target.clone());

    let watcher =
        ProjectWatcher::new(Arc::clone(&f.daemon), f.project_id, writes).unwrap();
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watcher.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(&target, b"runtime output").unwrap();
    // Longer than the debounce window; the event must not surface.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();
    let _ = task.await;

    assert!(sub.try_recv().is_none(), "system write should be suppressed");
}
