//! The ask/answer suspension point: a worker parked on a question stays
//! unfinished until an external answer arrives or the job is cancelled.

use super::test_utils::{ext, plan_harness, target, FnJob};
use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tessera::context::ContextMap;
use tessera::error::JobError;
use tessera::event::EventBus;
use tessera::extension::Namespace;
use tessera::job::{JobScheduler, JobState, Request};
use tessera::plan::job::PROP_INTERACTIVE;
use tessera::plan::ExtensionPlanJob;

fn scheduler() -> JobScheduler {
    let (bus, _rx) = EventBus::new_pair();
    JobScheduler::new(bus)
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_blocks_until_answered() {
    let scheduler = scheduler();
    let job = FnJob::new(&["interactive"], |ctx| {
        async move {
            let answer = ctx.ask(json!({"question": "proceed?"})).await?;
            assert_eq!(answer, json!({"confirm": true}));
            Ok(())
        }
        .boxed()
    });

    let handle = scheduler.submit(job);
    assert!(handle.status().wait_for_state(JobState::Waiting).await);
    assert_eq!(
        handle.status().question().unwrap(),
        json!({"question": "proceed?"})
    );

    // Not finished while the question is pending.
    let err = handle.join_timeout(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, JobError::JoinTimeout(_)));

    handle.answer(json!({"confirm": true})).unwrap();
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();
    assert!(handle.status().question().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_resolves_pending_ask() {
    let scheduler = scheduler();
    let job = FnJob::new(&["interactive"], |ctx| {
        async move {
            ctx.ask(json!("waiting")).await?;
            Ok(())
        }
        .boxed()
    });

    let handle = scheduler.submit(job);
    handle.status().wait_for_state(JobState::Waiting).await;
    handle.cancel();

    let err = handle.join_timeout(Duration::from_secs(5)).await.unwrap_err();
    assert_eq!(err, JobError::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn answer_without_question_is_rejected() {
    let scheduler = scheduler();
    let job = FnJob::new(&["plain"], |_ctx| async { Ok(()) }.boxed());
    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();
    assert_eq!(
        handle.answer(json!("too late")).unwrap_err(),
        JobError::NoPendingQuestion
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn interactive_plan_job_waits_for_confirmation() {
    let harness = plan_harness(vec![ext("foo", "1.0", &[])]);
    let ns = Namespace::root();
    let scheduler = scheduler();

    let job = Arc::new(ExtensionPlanJob::new(
        Request::new().set_property(PROP_INTERACTIVE, json!(true)),
        vec![target("foo", "1.0", &ns)],
        Arc::clone(&harness.resolver),
        Arc::clone(&harness.executor),
        Arc::clone(&harness.registry),
        Arc::clone(&harness.graph),
    ));

    let handle = scheduler.submit_with_context(job, &ContextMap::new());
    assert!(handle.status().wait_for_state(JobState::Waiting).await);
    // The pending question is the serialized plan, previewable as-is.
    let question = handle.status().question().unwrap();
    assert!(question.get("actions").is_some());
    assert!(harness.graph.installed(&ns, "foo").is_none());

    handle.answer(json!({"confirm": true})).unwrap();
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();
    assert!(harness.graph.installed(&ns, "foo").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn interactive_plan_job_rejection_cancels() {
    let harness = plan_harness(vec![ext("foo", "1.0", &[])]);
    let ns = Namespace::root();
    let scheduler = scheduler();

    let job = Arc::new(ExtensionPlanJob::new(
        Request::new().set_property(PROP_INTERACTIVE, json!(true)),
        vec![target("foo", "1.0", &ns)],
        Arc::clone(&harness.resolver),
        Arc::clone(&harness.executor),
        Arc::clone(&harness.registry),
        Arc::clone(&harness.graph),
    ));

    let handle = scheduler.submit_with_context(job, &ContextMap::new());
    handle.status().wait_for_state(JobState::Waiting).await;
    handle.answer(json!({"confirm": false})).unwrap();

    let err = handle.join_timeout(Duration::from_secs(5)).await.unwrap_err();
    assert_eq!(err, JobError::Cancelled);
    assert!(harness.graph.installed(&ns, "foo").is_none());
}
