#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::{MemLister, OtherRecord, Recorder, TestRecord, config, mem_prefetcher, paths, wait_until};
use preload_fs::Prefetcher;
use tokio::runtime::Handle;

/// `root/a` holding files `x` and `y`, plus `root/a/b/c/d`.
fn fixture() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    fs::create_dir_all(a.join("b").join("c")).unwrap();
    fs::write(a.join("x"), b"x").unwrap();
    fs::write(a.join("y"), b"yy").unwrap();
    fs::write(a.join("b").join("c").join("d"), b"d").unwrap();
    root
}

fn fs_prefetcher() -> Prefetcher {
    Prefetcher::new(&config(1_000, 2), Handle::current())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_then_load_returns_every_entry() {
    let root = fixture();
    let a = root.path().join("a");
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(TestRecord::new);

    entries.preload(&a).await.unwrap();
    wait_until("/a completes", || entries.peek(&a).is_some_and(|c| c.complete)).await;

    let records = entries.load(&a).await;
    assert_eq!(
        paths(&records),
        vec![a.join("b"), a.join("x"), a.join("y")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_waits_for_an_incomplete_folder() {
    let recorder = Recorder::new();
    recorder.gate("/a/y");
    let prefetcher = mem_prefetcher(MemLister::new().with_dir("/a", &["x", "y"], &[]), 64, 2);
    let entries = prefetcher.for_records(recorder.fetcher());

    entries.preload("/a").await.unwrap();
    let waiter = {
        let entries = entries.clone();
        tokio::spawn(async move { entries.load("/a").await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "load must wait for /a/y");
    assert!(!entries.peek("/a").unwrap().complete);

    recorder.release();
    let records = waiter.await.unwrap();
    assert_eq!(
        paths(&records),
        vec![PathBuf::from("/a/x"), PathBuf::from("/a/y")]
    );
    assert_eq!(recorder.count("/a/y"), 1, "load must not refetch");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_is_idempotent_after_completion() {
    let root = fixture();
    let a = root.path().join("a");
    let recorder = Recorder::new();
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(recorder.fetcher());

    entries.preload_wide(&a).await.unwrap();
    let first = entries.load(&a).await;
    let second = entries.load(&a).await;

    assert_eq!(paths(&first), paths(&second));
    assert_eq!(first.len(), 3);
    assert_eq!(recorder.count(a.join("x").to_str().unwrap()), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_without_prefetch_fetches_inline_and_caches_nothing() {
    let root = fixture();
    let a = root.path().join("a");
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(TestRecord::new);

    let records = entries.load(&a).await;
    assert_eq!(
        paths(&records),
        vec![a.join("b"), a.join("x"), a.join("y")]
    );
    assert!(entries.peek(&a).is_none());
    assert_eq!(prefetcher.registry().folder_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_of_missing_directory_is_empty() {
    let root = fixture();
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(TestRecord::new);

    assert!(entries.load(root.path().join("nope")).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_wide_reaches_children_and_parent() {
    let root = fixture();
    let a = root.path().join("a");
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(TestRecord::new);

    let report = entries.preload_wide(&a).await.unwrap();
    assert_eq!(report.folders_created, 3);

    assert!(entries.peek(&a).is_some());
    assert!(entries.peek(a.join("b")).is_some());
    assert!(entries.peek(root.path()).is_some());
    assert!(entries.peek(a.join("b").join("c")).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_folder_skips_neighbours() {
    let root = fixture();
    let a = root.path().join("a");
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(TestRecord::new);

    let report = entries.preload_folder(&a).await.unwrap();
    assert_eq!(report.folders_created, 1);
    assert!(entries.peek(a.join("b")).is_none());
    assert!(entries.peek(root.path()).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_during_future_fetch_drops_the_late_result() {
    let recorder = Recorder::new();
    recorder.gate("/a/b/c/d");
    let lister = MemLister::new()
        .with_dir("/a/b", &[], &["c"])
        .with_dir("/a/b/c", &["d"], &[]);
    let prefetcher = mem_prefetcher(lister, 64, 2);
    let entries = prefetcher.for_records(recorder.fetcher());

    entries.preload("/a/b").await.unwrap();
    wait_until("the FUTURE fetch starts", || recorder.has_started("/a/b/c/d")).await;
    assert!(prefetcher.clear() >= 2);
    recorder.release();

    let records = entries.load("/a/b/c").await;
    assert_eq!(paths(&records), vec![PathBuf::from("/a/b/c/d")]);
    // Calls 1 and 2 were the prefetches of /a/b/c and /a/b/c/d.
    assert_eq!(
        records[0].call, 3,
        "load must come from a fresh inline fetch, not the stale one"
    );
    assert_eq!(recorder.count("/a/b/c/d"), 2);

    wait_until("the stale fetch finishes", || entries.is_idle()).await;
    assert!(entries.peek("/a/b/c").is_none(), "late result must be dropped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_while_waiting_falls_back_to_inline_load() {
    let recorder = Recorder::new();
    recorder.gate("/d0/x");
    let mut lister = MemLister::new();
    for i in 0..5 {
        lister = lister.with_dir(&format!("/d{i}"), &["x"], &[]);
    }
    let prefetcher = mem_prefetcher(lister, 4, 2);
    let entries = prefetcher.for_records(recorder.fetcher());

    entries.preload_folder("/d0").await.unwrap();
    let waiter = {
        let entries = entries.clone();
        tokio::spawn(async move { entries.load("/d0").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    for i in 1..5 {
        entries.preload_folder(format!("/d{i}")).await.unwrap();
    }
    assert!(entries.peek("/d0").is_none(), "/d0 is the oldest folder");

    recorder.release();
    let records = waiter.await.unwrap();
    assert_eq!(paths(&records), vec![PathBuf::from("/d0/x")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn load_with_delivers_on_a_runtime_task() {
    let prefetcher = mem_prefetcher(MemLister::new().with_dir("/a", &["x", "y"], &[]), 64, 2);
    let entries = prefetcher.for_records(TestRecord::new);
    entries.preload("/a").await.unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    entries
        .load_with("/a", move |records| {
            tx.send(records.len()).unwrap();
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn record_types_share_paths_without_mixing() {
    let prefetcher = mem_prefetcher(MemLister::new().with_dir("/a", &["x"], &[]), 64, 2);
    let tests = prefetcher.for_records(TestRecord::new);
    let others = prefetcher.for_records(|path: &Path| OtherRecord(path.to_path_buf()));

    tests.preload("/a").await.unwrap();
    wait_until("/a completes", || tests.peek("/a").is_some_and(|c| c.complete)).await;
    assert!(others.peek("/a").is_none());

    others.preload("/a").await.unwrap();
    let loaded: Vec<Arc<OtherRecord>> = others.load("/a").await;
    assert_eq!(loaded[0].0, PathBuf::from("/a/x"));
    assert_eq!(prefetcher.all_records().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_entry_does_not_strand_waiters() {
    let recorder = Recorder::new();
    recorder.panic_on("/a/bad");
    let prefetcher = mem_prefetcher(MemLister::new().with_dir("/a", &["ok", "bad"], &[]), 64, 2);
    let entries = prefetcher.for_records(recorder.fetcher());

    entries.preload("/a").await.unwrap();
    let records = entries.load("/a").await;
    assert_eq!(paths(&records), vec![PathBuf::from("/a/ok")]);

    let folder = entries.table().get(Path::new("/a")).unwrap();
    assert!(folder.is_complete());
    assert_eq!(folder.failures().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relative_paths_are_made_absolute() {
    let prefetcher = fs_prefetcher();
    let entries = prefetcher.for_records(TestRecord::new);

    entries.preload_folder(".").await.unwrap();
    let cwd = std::env::current_dir().unwrap();
    // The raw table lookup bypasses normalization, so only the exact key can match.
    assert!(entries.table().get(&cwd).is_some(), "folder must be keyed by {cwd:?}");
    assert_eq!(prefetcher.registry().folder_count(), 1);
}
