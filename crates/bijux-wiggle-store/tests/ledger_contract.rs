// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_core::FixedClock;
use bijux_wiggle_model::{BatchBackend, BatchHandle, CacheEntry, JobId, JobStatus, NormalizedQuery};
use bijux_wiggle_store::{StoreErrorCode, WiggleStore};
use std::sync::Arc;

fn q(text: &str) -> NormalizedQuery {
    NormalizedQuery::new(text).expect("query")
}

fn row(store: &WiggleStore, query: &str, location: &str, job_id: JobId) -> CacheEntry {
    CacheEntry {
        query: q(query),
        location: location.to_string(),
        last_access: store.now_unix(),
        pinned: false,
        primary: true,
        job_id: Some(job_id),
    }
}

#[test]
fn job_status_only_moves_forward() {
    let store = WiggleStore::open_in_memory().expect("store");
    let id = store
        .create_job(BatchBackend::Sge, "/w/a.bw", JobStatus::Launched)
        .expect("create");
    assert_eq!(store.advance_status(id, JobStatus::Waiting).expect("wait"), JobStatus::Waiting);
    assert_eq!(store.advance_status(id, JobStatus::Waiting).expect("repeat"), JobStatus::Waiting);
    let back = store.advance_status(id, JobStatus::Launched).expect_err("backwards");
    assert_eq!(back.code, StoreErrorCode::Conflict);
    store.advance_status(id, JobStatus::Done).expect("done");
    let after_terminal = store.advance_status(id, JobStatus::Error).expect_err("terminal");
    assert_eq!(after_terminal.code, StoreErrorCode::Conflict);
    assert_eq!(store.require_job(id).expect("job").status, JobStatus::Done);
}

#[test]
fn unknown_job_is_not_found() {
    let store = WiggleStore::open_in_memory().expect("store");
    assert!(store.get_job(JobId(42)).expect("get").is_none());
    let err = store.advance_status(JobId(42), JobStatus::Done).expect_err("missing");
    assert_eq!(err.code, StoreErrorCode::NotFound);
    let err = store.set_temp(JobId(42), Some("/tmp/x")).expect_err("missing");
    assert_eq!(err.code, StoreErrorCode::NotFound);
}

#[test]
fn handles_and_temp_roundtrip_through_ledger() {
    let store = WiggleStore::open_in_memory().expect("store");
    let id = store
        .create_job(BatchBackend::Lsf, "/w/b.bw", JobStatus::Launched)
        .expect("create");
    let h1 = BatchHandle::parse("101").expect("h1");
    let h2 = BatchHandle::parse("102").expect("h2");
    store.set_handles(id, Some(&h1), Some(&h2)).expect("handles");
    store.set_temp(id, Some("/w/tasks.json")).expect("temp");
    let job = store.require_job(id).expect("job");
    assert_eq!(job.stage1_handle, Some(h1));
    assert_eq!(job.stage2_handle, Some(h2));
    assert_eq!(job.temp.as_deref(), Some("/w/tasks.json"));
    assert_eq!(job.backend, BatchBackend::Lsf);
    assert_eq!(job.destination, "/w/b.bw");
    assert_eq!(store.list_jobs().expect("list").len(), 1);
}

#[test]
fn duplicate_insert_keeps_first_row() {
    let store = WiggleStore::open_in_memory().expect("store");
    let first = store
        .create_job(BatchBackend::Sge, "/w/1.bw", JobStatus::Launched)
        .expect("job");
    let second = store
        .create_job(BatchBackend::Sge, "/w/2.bw", JobStatus::Launched)
        .expect("job");
    assert!(store.insert(&row(&store, "mean f1 f2", "/w/1.bw", first)).expect("insert"));
    assert!(!store.insert(&row(&store, "mean f1 f2", "/w/2.bw", second)).expect("insert"));
    let kept = store.lookup(&q("mean f1 f2")).expect("lookup").expect("row");
    assert_eq!(kept.location, "/w/1.bw");
    assert_eq!(kept.job_id, Some(first));
}

#[test]
fn completed_location_requires_finished_job_and_touches_row() {
    let clock = Arc::new(FixedClock::new(1_000));
    let store = WiggleStore::open_in_memory()
        .expect("store")
        .with_clock(clock.clone());
    let id = store
        .create_job(BatchBackend::Sge, "/w/m.bw", JobStatus::Launched)
        .expect("job");
    let branch = q("mean f1 f2 :");
    store.insert(&row(&store, branch.as_str(), "/w/m.bw", id)).expect("insert");
    assert_eq!(store.completed_location(&branch).expect("pending"), None);

    store.advance_status(id, JobStatus::Empty).expect("empty");
    clock.advance_days(3);
    assert_eq!(
        store.completed_location(&branch).expect("hit").as_deref(),
        Some("/w/m.bw")
    );
    let entry = store.lookup(&branch).expect("lookup").expect("row");
    assert_eq!(entry.last_access, 1_000 + 3 * 86_400);
}

#[test]
fn errored_branches_are_not_reused() {
    let store = WiggleStore::open_in_memory().expect("store");
    let id = store
        .create_job(BatchBackend::Sge, "/w/e.bw", JobStatus::Launched)
        .expect("job");
    let branch = q("max f3 :");
    store.insert(&row(&store, branch.as_str(), "/w/e.bw", id)).expect("insert");
    store.advance_status(id, JobStatus::Error).expect("error");
    assert_eq!(store.completed_location(&branch).expect("lookup"), None);
}

#[test]
fn delete_job_removes_its_cache_rows() {
    let mut store = WiggleStore::open_in_memory().expect("store");
    let id = store
        .create_job(BatchBackend::Synchronous, "/w/d.bw", JobStatus::Launched)
        .expect("job");
    store.insert(&row(&store, "sum f1", "/w/d.bw", id)).expect("insert");
    assert!(store.delete_job(id).expect("delete"));
    assert!(store.lookup(&q("sum f1")).expect("lookup").is_none());
    assert!(store.list_cache().expect("list").is_empty());
    assert!(!store.delete_job(id).expect("again"));
}

#[test]
fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wiggle.sqlite3");
    let id = {
        let store = WiggleStore::open(&path).expect("open");
        let id = store
            .create_job(BatchBackend::Sge, "/w/p.bw", JobStatus::Launched)
            .expect("job");
        store.advance_status(id, JobStatus::Waiting).expect("wait");
        id
    };
    let store = WiggleStore::open(&path).expect("reopen");
    assert_eq!(store.path(), Some(path.as_path()));
    assert_eq!(store.require_job(id).expect("job").status, JobStatus::Waiting);
}
