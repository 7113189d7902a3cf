//! Per-job event ordering: Started strictly precedes progress and log
//! events, which strictly precede Finishing, which strictly precedes
//! Finished.

use super::test_utils::FnJob;
use futures::FutureExt;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tessera::error::JobError;
use tessera::event::{EventBus, JobEvent, JobEventEnvelope, LogLevel};
use tessera::job::JobScheduler;

/// Receive until the terminal Finished event arrives; events are published
/// asynchronously, so reading after join alone would race.
fn drain_until_finished(rx: &Receiver<JobEventEnvelope>) -> Vec<JobEventEnvelope> {
    let mut envelopes = Vec::new();
    loop {
        let envelope = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("timed out waiting for job events");
        let done = matches!(envelope.event, JobEvent::Finished { .. });
        envelopes.push(envelope);
        if done {
            return envelopes;
        }
    }
}

fn position(events: &[JobEvent], predicate: impl Fn(&JobEvent) -> bool) -> usize {
    events
        .iter()
        .position(predicate)
        .expect("expected event missing")
}

#[tokio::test(flavor = "multi_thread")]
async fn lifecycle_events_are_strictly_ordered() {
    let (bus, rx) = EventBus::new_pair();
    let scheduler = JobScheduler::new(bus);

    let job = FnJob::new(&["evt"], |ctx| {
        async move {
            ctx.progress("step one", 0, 2);
            ctx.log(LogLevel::Info, "halfway");
            ctx.progress("step two", 1, 2);
            Ok(())
        }
        .boxed()
    });

    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();

    let events: Vec<JobEvent> = drain_until_finished(&rx)
        .into_iter()
        .map(|envelope| envelope.event)
        .collect();
    let started = position(&events, |e| matches!(e, JobEvent::Started { .. }));
    let first_progress = position(&events, |e| matches!(e, JobEvent::Progress { .. }));
    let log = position(&events, |e| matches!(e, JobEvent::Log { .. }));
    let finishing = position(&events, |e| matches!(e, JobEvent::Finishing { .. }));
    let finished = position(&events, |e| matches!(e, JobEvent::Finished { .. }));

    assert!(started < first_progress);
    assert!(first_progress < log);
    assert!(log < finishing);
    assert!(finishing < finished);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_job_reports_error_on_finishing_and_finished() {
    let (bus, rx) = EventBus::new_pair();
    let scheduler = JobScheduler::new(bus);

    let job = FnJob::new(&["evt"], |_ctx| {
        async { Err(JobError::Execution("broken action".to_string())) }.boxed()
    });

    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap_err();

    let events: Vec<JobEvent> = drain_until_finished(&rx)
        .into_iter()
        .map(|envelope| envelope.event)
        .collect();
    let finishing_error = events.iter().find_map(|event| match event {
        JobEvent::Finishing { error } => Some(error.clone()),
        _ => None,
    });
    let finished_error = events.iter().find_map(|event| match event {
        JobEvent::Finished { error } => Some(error.clone()),
        _ => None,
    });

    assert!(finishing_error.unwrap().unwrap().contains("broken action"));
    assert!(finished_error.unwrap().unwrap().contains("broken action"));
}

#[tokio::test(flavor = "multi_thread")]
async fn envelopes_carry_job_identity() {
    let (bus, rx) = EventBus::new_pair();
    let scheduler = JobScheduler::new(bus);

    let request = tessera::job::Request::with_id(["evt", "one"]);
    let job = FnJob::with_request(&["evt"], request, |_ctx| async { Ok(()) }.boxed());

    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();

    for envelope in drain_until_finished(&rx) {
        assert_eq!(
            envelope.job_id,
            Some(vec!["evt".to_string(), "one".to_string()])
        );
        assert_eq!(envelope.job_type, "test");
    }
}
