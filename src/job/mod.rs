//! Asynchronous jobs: the `Job` trait, submit requests, the context handed
//! to a running job body, and the handle returned to submitters.

use crate::context::ContextMap;
use crate::error::JobError;
use crate::event::{EventBus, JobEvent, JobEventEnvelope, LogLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub mod group;
pub mod scheduler;
pub mod status;
pub mod store;

pub use group::{GroupPathRegistry, JobGroupPath};
pub use scheduler::{JobScheduler, SchedulerConfig};
pub use status::{JobProgress, JobState, JobStatus, JobStatusSnapshot, LogEvent};
pub use store::JobStatusStore;

/// A job submission. Immutable once the job starts.
///
/// The optional hierarchical id doubles as the status-store key and, by
/// convention, a prefix of the job's group path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Vec<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: Some(segments.into_iter().map(Into::into).collect()),
            properties: BTreeMap::new(),
        }
    }

    pub fn set_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// An asynchronously executed unit of work with its own status, log and
/// group path. Implementations are submitted to the [`JobScheduler`].
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn job_type(&self) -> &str;

    fn request(&self) -> &Request;

    /// Exclusion group: jobs whose paths prefix-conflict never run together.
    fn group_path(&self) -> JobGroupPath;

    /// Isolated jobs get a dedicated worker thread rather than a shared pool
    /// slot, so they never share fate with unrelated work.
    fn isolated(&self) -> bool {
        false
    }

    /// Whether the finished status may be persisted to the status store.
    fn serialized(&self) -> bool {
        true
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobError>;
}

/// Execution context handed to a job body: status updates, event emission,
/// cooperative cancellation, the ask/answer suspension point, and the
/// restored ambient request context.
#[derive(Clone)]
pub struct JobContext {
    status: Arc<JobStatus>,
    bus: EventBus,
    ambient: ContextMap,
}

impl JobContext {
    pub(crate) fn new(status: Arc<JobStatus>, bus: EventBus, ambient: ContextMap) -> Self {
        Self {
            status,
            bus,
            ambient,
        }
    }

    pub fn status(&self) -> &Arc<JobStatus> {
        &self.status
    }

    /// The whitelisted slice of the submitter's context, restored onto this
    /// worker before the job body started.
    pub fn ambient(&self) -> &ContextMap {
        &self.ambient
    }

    /// Append to the status log tail and publish a log event.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        self.status.push_log(level, message.clone());
        self.emit(JobEvent::Log { level, message });
    }

    /// Update progress counters and publish a progress event.
    pub fn progress(&self, message: impl Into<String>, done: usize, total: usize) {
        let message = message.into();
        self.status.set_progress(message.clone(), done, total);
        self.emit(JobEvent::Progress {
            message,
            done,
            total,
        });
    }

    /// Cooperative cancellation check point.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.status.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Suspend on a question until an external caller answers (or the job is
    /// cancelled). The only blocking suspension point besides join.
    pub async fn ask(&self, question: Value) -> Result<Value, JobError> {
        let rx = self.status.begin_ask(question.clone())?;
        self.emit(JobEvent::Waiting { question });
        match rx.await {
            Ok(value) => {
                self.status.resume_running();
                Ok(value)
            }
            Err(_) => Err(JobError::Cancelled),
        }
    }

    pub(crate) fn emit(&self, event: JobEvent) {
        self.bus.emit_best_effort(JobEventEnvelope::now(
            self.status.request().id.clone(),
            self.status.job_type(),
            event,
        ));
    }
}

/// Handle returned by `submit`. Carries the shared status; dropping the
/// handle does not affect the job.
#[derive(Clone)]
pub struct JobHandle {
    status: Arc<JobStatus>,
}

impl JobHandle {
    pub(crate) fn new(status: Arc<JobStatus>) -> Self {
        Self { status }
    }

    pub fn status(&self) -> &Arc<JobStatus> {
        &self.status
    }

    /// Await the job's terminal state and surface its recorded outcome.
    pub async fn join(&self) -> Result<(), JobError> {
        self.status.join().await
    }

    pub async fn join_timeout(&self, timeout: Duration) -> Result<(), JobError> {
        self.status.join_timeout(timeout).await
    }

    /// Answer the job's pending question, resuming it.
    pub fn answer(&self, value: Value) -> Result<(), JobError> {
        self.status.answer(value)
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.status.cancel();
    }
}
