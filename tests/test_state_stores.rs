//! Tests for StateStore implementations and the persister task.

use std::sync::Arc;

use benchstate::engine::types::*;
use benchstate::engine::{CaseRegistry, RunStateEngine, StatePublisher};
use benchstate::storage::json_store::JsonStateStore;
use benchstate::storage::memory_store::MemoryStateStore;
use benchstate::storage::{StateStore, spawn_persister};

fn id(s: &str) -> CaseId {
    CaseId::new(s).unwrap()
}

/// A finished or running document built through a real engine.
async fn document(plan: &str, finish: bool) -> RunState {
    let engine = RunStateEngine::new();
    let mut reg = CaseRegistry::new();
    reg.register(id("m::one"), vec![]).unwrap();
    reg.register(id("m::two"), vec![id("m::one")]).unwrap();
    engine.start_run(plan, reg).await.unwrap();
    engine
        .apply_outcome(&id("m::one"), Outcome::Failed, OutcomeDetails::default())
        .await
        .unwrap();

    if finish {
        engine.abort_run("test teardown").await.unwrap();
    }
    RunState::clone(&engine.snapshot().await.unwrap())
}

// ===== MemoryStateStore =====

#[tokio::test]
async fn memory_store_persist_and_load() {
    let store = MemoryStateStore::new();
    let run = document("mem", false).await;
    store.persist(&run).await.unwrap();

    let loaded = store.load(&run.id).await.unwrap();
    assert_eq!(loaded, run);
}

#[tokio::test]
async fn memory_store_missing_run() {
    let store = MemoryStateStore::new();
    assert!(store.load("missing").await.is_err());
}

#[tokio::test]
async fn memory_store_list_filters_by_status() {
    let store = MemoryStateStore::new();
    let running = document("a", false).await;
    let mut passed = document("b", true).await;
    passed.status = RunStatus::Passed;
    store.persist(&running).await.unwrap();
    store.persist(&passed).await.unwrap();

    assert_eq!(store.list_runs(None).await.unwrap().len(), 2);
    let only = store.list_runs(Some(RunStatus::Passed)).await.unwrap();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].plan, "b");
}

// ===== JsonStateStore =====

#[tokio::test]
async fn json_store_persist_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());
    let run = document("json", false).await;

    store.persist(&run).await.unwrap();
    let loaded = store.load(&run.id).await.unwrap();

    assert_eq!(loaded, run);
    assert!(dir.path().join(format!("{}.json", run.id)).exists());
    assert!(!dir.path().join(format!("{}.json.tmp", run.id)).exists());
}

#[tokio::test]
async fn json_store_persist_overwrites_older_revision() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());
    let mut run = document("json", false).await;

    store.persist(&run).await.unwrap();
    run.revision += 5;
    store.persist(&run).await.unwrap();

    assert_eq!(store.load(&run.id).await.unwrap().revision, run.revision);
    assert_eq!(store.list_runs(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn json_store_list_runs_and_latest_unfinished() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());

    let finished = document("done", true).await;
    let open = document("open", false).await;
    store.persist(&finished).await.unwrap();
    store.persist(&open).await.unwrap();

    let all = store.list_runs(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let failed = store.list_runs(Some(RunStatus::Failed)).await.unwrap();
    assert_eq!(failed.len(), 2);

    let resumable = store.latest_unfinished().await.unwrap().unwrap();
    assert_eq!(resumable.id, open.id);
}

#[tokio::test]
async fn json_store_delete_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());
    let run = document("del", true).await;

    store.persist(&run).await.unwrap();
    store.delete_run(&run.id).await.unwrap();

    assert!(store.load(&run.id).await.is_err());
}

#[tokio::test]
async fn json_store_list_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path().join("nonexistent"));

    let runs = store.list_runs(None).await.unwrap();
    assert!(runs.is_empty());
}

// ===== Persister =====

#[tokio::test]
async fn persister_writes_every_transition() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(dir.path()));
    let engine = RunStateEngine::new();
    let persister = spawn_persister(store.clone(), engine.publisher());

    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    let started = engine.start_run("persist", reg).await.unwrap();
    engine
        .apply_outcome(&id("one"), Outcome::Passed, OutcomeDetails::default())
        .await
        .unwrap();
    let done = engine.finish_run().await.unwrap();

    persister.shutdown(engine.publisher()).await.unwrap();

    let stored = store.load(&started.id).await.unwrap();
    assert_eq!(stored, *done);
    assert_eq!(stored.status, RunStatus::Passed);
    assert!(stored.is_finished());
}

#[tokio::test]
async fn restart_resumes_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(dir.path()));

    let first = RunStateEngine::new();
    let persister = spawn_persister(store.clone(), first.publisher());
    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    reg.register(id("two"), vec![id("one")]).unwrap();
    first.start_run("restart", reg).await.unwrap();
    first
        .apply_outcome(&id("one"), Outcome::Passed, OutcomeDetails::default())
        .await
        .unwrap();
    persister.shutdown(first.publisher()).await.unwrap();
    drop(first);

    let second = RunStateEngine::new();
    let unfinished = store.latest_unfinished().await.unwrap().unwrap();
    second.resume_run(unfinished).await.unwrap();

    assert!(second.resolve(&id("two")).await.unwrap().is_eligible());
    second
        .apply_outcome(&id("two"), Outcome::Passed, OutcomeDetails::default())
        .await
        .unwrap();
    assert_eq!(second.finish_run().await.unwrap().status, RunStatus::Passed);
}

#[tokio::test]
async fn lagging_persister_still_writes_final_state() {
    let publisher = Arc::new(StatePublisher::new(2));
    let engine = RunStateEngine::with_publisher(publisher.clone());
    let store = Arc::new(MemoryStateStore::new());
    let persister = spawn_persister(store.clone(), &publisher);

    let mut reg = CaseRegistry::new();
    for name in ["a", "b", "c", "d"] {
        reg.register(id(name), vec![]).unwrap();
    }
    engine.start_run("lagging", reg).await.unwrap();
    // No yield between writes: the persister's queue overflows.
    for name in ["a", "b", "c", "d"] {
        engine
            .apply_outcome(&id(name), Outcome::Passed, OutcomeDetails::default())
            .await
            .unwrap();
    }
    let done = engine.finish_run().await.unwrap();

    persister.shutdown(&publisher).await.unwrap();

    let stored = store.load(&done.id).await.unwrap();
    assert_eq!(stored.revision, done.revision);
    assert!(stored.is_finished());
    assert_eq!(stored.status, RunStatus::Passed);
    assert!(store.latest_unfinished().await.unwrap().is_none());
}

#[tokio::test]
async fn lagging_persister_records_abort_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(dir.path()));
    let publisher = Arc::new(StatePublisher::new(1));
    let engine = RunStateEngine::with_publisher(publisher.clone());
    let persister = spawn_persister(store.clone(), &publisher);

    let mut reg = CaseRegistry::new();
    reg.register(id("one"), vec![]).unwrap();
    reg.register(id("two"), vec![]).unwrap();
    engine.start_run("abort", reg).await.unwrap();
    engine
        .apply_outcome(&id("one"), Outcome::Passed, OutcomeDetails::default())
        .await
        .unwrap();
    let aborted = engine.abort_run("fixture unplugged").await.unwrap();

    persister.shutdown(&publisher).await.unwrap();

    let stored = store.load(&aborted.id).await.unwrap();
    assert_eq!(stored, *aborted);
    assert!(store.latest_unfinished().await.unwrap().is_none());
}

#[tokio::test]
async fn json_store_rejects_ids_that_escape_the_store() {
    let root = tempfile::tempdir().unwrap();
    let store_dir = root.path().join("runs");
    let store = JsonStateStore::new(&store_dir);

    // A valid run document sitting next to, not inside, the store.
    let outside = document("outside", true).await;
    std::fs::write(
        root.path().join("outside.json"),
        serde_json::to_string(&outside).unwrap(),
    )
    .unwrap();

    for bad in ["../outside", "..", "a/b", "a\\b", ""] {
        assert!(store.load(bad).await.is_err(), "load accepted {bad:?}");
        assert!(store.delete_run(bad).await.is_err(), "delete accepted {bad:?}");
    }
    assert!(root.path().join("outside.json").exists());

    let mut forged = outside.clone();
    forged.id = "../forged".to_string();
    assert!(store.persist(&forged).await.is_err());
    assert!(!root.path().join("forged.json").exists());
}
