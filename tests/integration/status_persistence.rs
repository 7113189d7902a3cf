//! Durable status: finished jobs with a declared id land in the sled-backed
//! store and stay queryable through the scheduler after the fact.

use super::test_utils::FnJob;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tessera::context::{ContextMap, ContextStore, PassthroughContextProvider};
use tessera::error::JobError;
use tessera::event::{EventBus, LogLevel};
use tessera::job::{JobScheduler, JobState, JobStatusStore, Request, SchedulerConfig};
use serde_json::json;

fn persistent_scheduler(dir: &TempDir) -> (JobScheduler, Arc<JobStatusStore>) {
    let db = sled::open(dir.path()).unwrap();
    let store = JobStatusStore::shared(db).unwrap();
    let (bus, _rx) = EventBus::new_pair();
    let context_store = ContextStore::new();
    context_store.register(Arc::new(PassthroughContextProvider::new(["user"])));
    let scheduler = JobScheduler::with_stores(
        bus,
        Arc::new(context_store),
        Some(Arc::clone(&store)),
        SchedulerConfig::default(),
    );
    (scheduler, store)
}

fn id(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

/// Persistence happens after the status flips to Finished, so a reader
/// racing a just-joined job polls briefly.
async fn wait_for_persisted(
    store: &JobStatusStore,
    key: &[String],
) -> tessera::job::JobStatusSnapshot {
    for _ in 0..250 {
        if let Some(snapshot) = store.get(key).unwrap() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job status was not persisted in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_status_is_persisted_under_request_id() {
    let dir = TempDir::new().unwrap();
    let (scheduler, store) = persistent_scheduler(&dir);

    let request = Request::with_id(["extension", "apply", "wiki:demo"]);
    let job = FnJob::with_request(&["extension", "wiki:demo"], request, |ctx| {
        async move {
            ctx.log(LogLevel::Info, "doing the work");
            Ok(())
        }
        .boxed()
    });

    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();

    let persisted = wait_for_persisted(&store, &id(&["extension", "apply", "wiki:demo"])).await;
    assert_eq!(persisted.state, JobState::Finished);
    assert!(persisted.error.is_none());
    assert_eq!(persisted.log.len(), 1);
    assert!(persisted.start_date.is_some());
    assert!(persisted.end_date.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_job_is_finished_with_error_in_store() {
    let dir = TempDir::new().unwrap();
    let (scheduler, store) = persistent_scheduler(&dir);

    let request = Request::with_id(["extension", "broken"]);
    let job = FnJob::with_request(&["extension", "broken"], request, |_ctx| {
        async { Err(JobError::Execution("disk full".to_string())) }.boxed()
    });

    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap_err();

    let persisted = wait_for_persisted(&store, &id(&["extension", "broken"])).await;
    assert_eq!(persisted.state, JobState::Finished);
    assert!(persisted.error.unwrap().contains("disk full"));
}

#[tokio::test(flavor = "multi_thread")]
async fn job_without_id_is_not_persisted() {
    let dir = TempDir::new().unwrap();
    let (scheduler, store) = persistent_scheduler(&dir);

    let job = FnJob::new(&["anon"], |_ctx| async { Ok(()) }.boxed());
    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.list(&[]).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduler_status_query_prefers_live_then_store() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _store) = persistent_scheduler(&dir);

    let request = Request::with_id(["query", "me"]);
    let job = FnJob::with_request(&["query"], request, |_ctx| async { Ok(()) }.boxed());
    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();

    let snapshot = scheduler.job_status(&id(&["query", "me"])).unwrap();
    assert_eq!(snapshot.state, JobState::Finished);
    assert!(scheduler.job_status(&id(&["query", "nothing"])).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn whitelisted_context_crosses_to_worker() {
    let dir = TempDir::new().unwrap();
    let (scheduler, _store) = persistent_scheduler(&dir);

    let ambient = ContextMap::new();
    ambient.set("user", json!("alice"));
    ambient.set("session-token", json!("secret"));

    let job = FnJob::new(&["ctx"], |ctx| {
        async move {
            // Only the provider-supported entry crossed the boundary.
            assert_eq!(ctx.ambient().get("user"), Some(json!("alice")));
            assert_eq!(ctx.ambient().get("session-token"), None);
            Ok(())
        }
        .boxed()
    });

    let handle = scheduler.submit_with_context(job, &ambient);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();
}
