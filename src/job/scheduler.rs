//! Job scheduler: group-path mutual exclusion, FIFO queueing of conflicting
//! jobs, worker dispatch, context transplant and status persistence.
//!
//! The occupancy registry and wait list are the only shared mutable state,
//! guarded by a single mutex held only for the conflict scan, never during
//! job execution.

use crate::context::{ContextMap, ContextStore};
use crate::error::JobError;
use crate::event::{EventBus, JobEvent, JobEventEnvelope};
use crate::job::group::{GroupPathRegistry, JobGroupPath};
use crate::job::status::{JobStatus, JobStatusSnapshot, DEFAULT_LOG_TAIL};
use crate::job::store::JobStatusStore;
use crate::job::{Job, JobContext, JobHandle};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of log events retained on each job status.
    #[serde(default = "default_log_tail_size")]
    pub log_tail_size: usize,

    /// Wait-list length beyond which submissions are logged as suspicious.
    /// The wait list itself is unbounded; indefinite waits are valid.
    #[serde(default = "default_waiting_warn_threshold")]
    pub waiting_warn_threshold: usize,
}

fn default_log_tail_size() -> usize {
    DEFAULT_LOG_TAIL
}

fn default_waiting_warn_threshold() -> usize {
    128
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            log_tail_size: default_log_tail_size(),
            waiting_warn_threshold: default_waiting_warn_threshold(),
        }
    }
}

struct QueuedJob {
    job: Arc<dyn Job>,
    path: JobGroupPath,
    status: Arc<JobStatus>,
    saved_context: HashMap<String, Value>,
}

struct SchedState {
    registry: GroupPathRegistry,
    waiting: VecDeque<QueuedJob>,
    /// Latest status per declared job id, for live status queries.
    live: HashMap<Vec<String>, Arc<JobStatus>>,
}

struct SchedulerInner {
    state: Mutex<SchedState>,
    bus: EventBus,
    context_store: Arc<ContextStore>,
    status_store: Option<Arc<JobStatusStore>>,
    config: SchedulerConfig,
    /// Pool jobs always spawn onto this runtime, even when the dispatching
    /// thread is an isolated worker with its own short-lived runtime.
    runtime: tokio::runtime::Handle,
}

/// Accepts job submissions and runs them asynchronously under the group-path
/// exclusion discipline. Cheap to clone; clones share state.
///
/// Pool jobs run as tokio tasks, so the scheduler must be used from within a
/// runtime; isolated jobs get a dedicated OS thread with its own
/// current-thread runtime.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    /// Create a scheduler with no context providers and no status
    /// persistence. Must be called within a tokio runtime.
    pub fn new(bus: EventBus) -> Self {
        Self::with_stores(bus, Arc::new(ContextStore::new()), None, SchedulerConfig::default())
    }

    /// Create a fully wired scheduler. Must be called within a tokio
    /// runtime; that runtime runs every non-isolated job.
    pub fn with_stores(
        bus: EventBus,
        context_store: Arc<ContextStore>,
        status_store: Option<Arc<JobStatusStore>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedState {
                    registry: GroupPathRegistry::new(),
                    waiting: VecDeque::new(),
                    live: HashMap::new(),
                }),
                bus,
                context_store,
                status_store,
                config,
                runtime: tokio::runtime::Handle::current(),
            }),
        }
    }

    /// Submit a job with no ambient context to transplant.
    pub fn submit(&self, job: Arc<dyn Job>) -> JobHandle {
        self.submit_with_context(job, &ContextMap::new())
    }

    /// Submit a job, saving the whitelisted slice of `ambient` for the
    /// worker. Accepted immediately; execution is asynchronous.
    pub fn submit_with_context(&self, job: Arc<dyn Job>, ambient: &ContextMap) -> JobHandle {
        let status = JobStatus::new(
            job.job_type(),
            job.request().clone(),
            job.isolated(),
            job.serialized(),
            self.inner.config.log_tail_size,
        );

        let supported = self.inner.context_store.supported_entries();
        let saved_context = self.inner.context_store.save(Some(&supported), ambient);

        let path = job.group_path();
        let queued = QueuedJob {
            job,
            path: path.clone(),
            status: Arc::clone(&status),
            saved_context,
        };

        let dispatchable = {
            let mut state = self.inner.state.lock();
            if let Some(id) = &status.request().id {
                state.live.insert(id.clone(), Arc::clone(&status));
            }
            if state.registry.occupy(&path) {
                Some(queued)
            } else {
                state.waiting.push_back(queued);
                if state.waiting.len() >= self.inner.config.waiting_warn_threshold {
                    warn!(
                        waiting = state.waiting.len(),
                        path = %path,
                        "job wait list is unusually long"
                    );
                }
                None
            }
        };

        match dispatchable {
            Some(queued) => {
                debug!(path = %path, job_type = %status.job_type(), "dispatching job");
                Self::spawn(Arc::clone(&self.inner), queued);
            }
            None => {
                debug!(path = %path, job_type = %status.job_type(), "queueing job behind conflicting path");
            }
        }

        JobHandle::new(status)
    }

    /// Status of the job with the given hierarchical id: the live status of
    /// a submitted job if present, else whatever the status store holds.
    pub fn job_status(&self, id: &[String]) -> Option<JobStatusSnapshot> {
        {
            let state = self.inner.state.lock();
            if let Some(status) = state.live.get(id) {
                return Some(status.snapshot());
            }
        }
        let store = self.inner.status_store.as_ref()?;
        match store.get(id) {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "failed to read persisted job status");
                None
            }
        }
    }

    /// Currently occupied group paths. Snapshot for diagnostics.
    pub fn occupied_paths(&self) -> Vec<JobGroupPath> {
        self.inner.state.lock().registry.occupied().to_vec()
    }

    /// Number of jobs queued behind conflicting paths.
    pub fn waiting_len(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    fn spawn(inner: Arc<SchedulerInner>, queued: QueuedJob) {
        if queued.status.is_isolated() {
            let name = format!("tessera-job-{}", queued.status.job_type().replace('/', "-"));
            let spawned = std::thread::Builder::new().name(name).spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(Self::run_job(inner, queued)),
                    Err(err) => {
                        error!(error = %err, "failed to build runtime for isolated job");
                        let error = JobError::Execution(format!(
                            "failed to start isolated worker: {err}"
                        ));
                        Self::complete(&inner, &queued.status, &queued.path, Some(error));
                    }
                }
            });
            if let Err(err) = spawned {
                error!(error = %err, "failed to spawn isolated worker thread");
            }
        } else {
            let runtime = inner.runtime.clone();
            runtime.spawn(Self::run_job(inner, queued));
        }
    }

    async fn run_job(inner: Arc<SchedulerInner>, queued: QueuedJob) {
        let QueuedJob {
            job,
            path,
            status,
            saved_context,
        } = queued;

        status.mark_started();
        inner.bus.emit_best_effort(JobEventEnvelope::now(
            status.request().id.clone(),
            status.job_type(),
            JobEvent::Started {
                request: status.request().clone(),
            },
        ));

        let outcome = if status.is_cancelled() {
            // Cancelled while queued: observed at the first check point.
            Err(JobError::Cancelled)
        } else {
            let ambient = ContextMap::new();
            inner.context_store.restore(&saved_context, &ambient);
            let ctx = JobContext::new(Arc::clone(&status), inner.bus.clone(), ambient);

            match AssertUnwindSafe(job.run(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(JobError::Execution("job body panicked".to_string())),
            }
        };

        match &outcome {
            Ok(()) => info!(
                job_type = %status.job_type(),
                path = %path,
                "job finished"
            ),
            Err(err) => warn!(
                job_type = %status.job_type(),
                path = %path,
                error = %err,
                "job finished with error"
            ),
        }

        Self::complete(&inner, &status, &path, outcome.err());
    }

    /// Terminal bookkeeping: release the path and claim unblocked queued
    /// jobs, record the outcome, publish finishing/finished, persist when
    /// permitted, then dispatch what the release freed up.
    ///
    /// The path is released before the status flips, so a `join` returning
    /// implies the group path is free again.
    fn complete(
        inner: &Arc<SchedulerInner>,
        status: &Arc<JobStatus>,
        path: &JobGroupPath,
        error: Option<JobError>,
    ) {
        let ready = {
            let mut state = inner.state.lock();
            state.registry.release(path);
            let mut ready = Vec::new();
            let mut index = 0;
            while index < state.waiting.len() {
                let candidate_path = state.waiting[index].path.clone();
                if state.registry.occupy(&candidate_path) {
                    if let Some(next) = state.waiting.remove(index) {
                        ready.push(next);
                    }
                } else {
                    index += 1;
                }
            }
            ready
        };

        let error_text = error.as_ref().map(ToString::to_string);
        status.mark_finished(error);

        inner.bus.emit_best_effort(JobEventEnvelope::now(
            status.request().id.clone(),
            status.job_type(),
            JobEvent::Finishing {
                error: error_text.clone(),
            },
        ));

        if let (Some(store), Some(id)) = (&inner.status_store, &status.request().id) {
            if status.is_serialized() {
                let persisted = store
                    .put(id, &status.snapshot())
                    .and_then(|()| store.flush());
                if let Err(err) = persisted {
                    warn!(error = %err, "failed to persist job status");
                }
            }
        }

        inner.bus.emit_best_effort(JobEventEnvelope::now(
            status.request().id.clone(),
            status.job_type(),
            JobEvent::Finished { error: error_text },
        ));

        for next in ready {
            debug!(path = %next.path, "dispatching queued job");
            Self::spawn(Arc::clone(inner), next);
        }
    }
}
