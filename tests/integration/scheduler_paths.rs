//! Scheduler concurrency: parallel unrelated jobs, serialized conflicting
//! jobs, FIFO dispatch of queued work, isolated workers.

use super::test_utils::FnJob;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera::event::EventBus;
use tessera::job::{JobScheduler, JobState};
use tokio::sync::{Barrier, Notify};

fn scheduler() -> JobScheduler {
    let (bus, _rx) = EventBus::new_pair();
    JobScheduler::new(bus)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sibling_namespace_jobs_run_in_parallel() {
    let scheduler = scheduler();
    // Both jobs must be inside their bodies at the same time to pass the
    // barrier; serialization would deadlock (and trip the join timeout).
    let barrier = Arc::new(Barrier::new(2));

    let make = |segment: &str| {
        let barrier = Arc::clone(&barrier);
        FnJob::new(&["extension", segment], move |_ctx| {
            let barrier = Arc::clone(&barrier);
            async move {
                barrier.wait().await;
                Ok(())
            }
            .boxed()
        })
    };

    let a = scheduler.submit(make("wiki:a"));
    let b = scheduler.submit(make("wiki:b"));
    a.join_timeout(Duration::from_secs(5)).await.unwrap();
    b.join_timeout(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parent_path_waits_for_all_children() {
    let scheduler = scheduler();
    let release_a = Arc::new(Notify::new());
    let release_b = Arc::new(Notify::new());

    let child = |segment: &str, release: &Arc<Notify>| {
        let release = Arc::clone(release);
        FnJob::new(&["ext", segment], move |_ctx| {
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok(())
            }
            .boxed()
        })
    };

    let a = scheduler.submit(child("wiki:a", &release_a));
    let b = scheduler.submit(child("wiki:b", &release_b));
    a.status().wait_for_state(JobState::Running).await;
    b.status().wait_for_state(JobState::Running).await;

    let parent = scheduler.submit(FnJob::new(&["ext"], |_ctx| async { Ok(()) }.boxed()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(parent.status().state(), JobState::None);
    assert_eq!(scheduler.waiting_len(), 1);

    // One child finishing is not enough: the other still occupies ext/*.
    release_a.notify_one();
    a.join_timeout(Duration::from_secs(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(parent.status().state(), JobState::None);

    release_b.notify_one();
    b.join_timeout(Duration::from_secs(5)).await.unwrap();
    parent.join_timeout(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_conflicting_jobs_dispatch_fifo() {
    let scheduler = scheduler();
    let release = Arc::new(Notify::new());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sequence = Arc::new(AtomicUsize::new(0));

    let holder = {
        let release = Arc::clone(&release);
        FnJob::new(&["ext"], move |_ctx| {
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok(())
            }
            .boxed()
        })
    };
    let holder_handle = scheduler.submit(holder);
    holder_handle.status().wait_for_state(JobState::Running).await;

    let mut handles = Vec::new();
    for i in 0..3 {
        let order = Arc::clone(&order);
        let sequence = Arc::clone(&sequence);
        let job = FnJob::new(&["ext"], move |_ctx| {
            let order = Arc::clone(&order);
            let sequence = Arc::clone(&sequence);
            let tag = i;
            async move {
                order.lock().push((sequence.fetch_add(1, Ordering::SeqCst), tag));
                Ok(())
            }
            .boxed()
        });
        handles.push(scheduler.submit(job));
    }
    assert_eq!(scheduler.waiting_len(), 3);

    release.notify_one();
    holder_handle.join_timeout(Duration::from_secs(5)).await.unwrap();
    for handle in &handles {
        handle.join_timeout(Duration::from_secs(5)).await.unwrap();
    }

    let recorded = order.lock().clone();
    let tags: Vec<usize> = recorded.iter().map(|(_, tag)| *tag).collect();
    assert_eq!(tags, vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completion_dispatches_multiple_independent_jobs() {
    let scheduler = scheduler();
    let release = Arc::new(Notify::new());

    let holder = {
        let release = Arc::clone(&release);
        FnJob::new(&["ext"], move |_ctx| {
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok(())
            }
            .boxed()
        })
    };
    let holder_handle = scheduler.submit(holder);
    holder_handle.status().wait_for_state(JobState::Running).await;

    // Both are blocked by the holder but not by each other; one completion
    // pass must dispatch them both.
    let a = scheduler.submit(FnJob::new(&["ext", "wiki:a"], |_ctx| async { Ok(()) }.boxed()));
    let b = scheduler.submit(FnJob::new(&["ext", "wiki:b"], |_ctx| async { Ok(()) }.boxed()));
    assert_eq!(scheduler.waiting_len(), 2);

    release.notify_one();
    a.join_timeout(Duration::from_secs(5)).await.unwrap();
    b.join_timeout(Duration::from_secs(5)).await.unwrap();
    assert_eq!(scheduler.waiting_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn isolated_job_runs_on_dedicated_thread() {
    let scheduler = scheduler();
    let job = FnJob::isolated(&["sync"], |_ctx| {
        async {
            let name = std::thread::current().name().map(str::to_string);
            assert!(name.unwrap_or_default().starts_with("tessera-job-"));
            Ok(())
        }
        .boxed()
    });

    let handle = scheduler.submit(job);
    handle.join_timeout(Duration::from_secs(5)).await.unwrap();
}
