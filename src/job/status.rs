//! Per-job status: state machine, bounded log tail, progress counters and
//! the ask/answer rendezvous.
//!
//! A status is owned by its job while running and read-shared afterwards.
//! State transitions: `None → Running`, `Running ↔ Waiting` (ask/answer),
//! `Running → Finished` (complete or cancel). `Finished` is terminal.

use crate::error::JobError;
use crate::event::LogLevel;
use crate::job::Request;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

pub const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted but not yet started (possibly queued behind a conflict).
    None,
    Running,
    /// Suspended in `ask`, awaiting an external answer.
    Waiting,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub message: String,
    pub done: usize,
    pub total: usize,
}

struct StatusInner {
    state: JobState,
    error: Option<JobError>,
    log: VecDeque<LogEvent>,
    log_capacity: usize,
    progress: JobProgress,
    question: Option<Value>,
    answer_tx: Option<oneshot::Sender<Value>>,
    cancelled: bool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

/// Shared, thread-safe view of one job's status. Handed out as
/// `Arc<JobStatus>`; the scheduler and the worker hold the same instance the
/// submitter got back on the handle.
pub struct JobStatus {
    job_type: String,
    request: Request,
    isolated: bool,
    serialized: bool,
    inner: Mutex<StatusInner>,
    state_tx: watch::Sender<JobState>,
}

impl JobStatus {
    pub fn new(
        job_type: impl Into<String>,
        request: Request,
        isolated: bool,
        serialized: bool,
        log_capacity: usize,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(JobState::None);
        Arc::new(Self {
            job_type: job_type.into(),
            request,
            isolated,
            serialized,
            inner: Mutex::new(StatusInner {
                state: JobState::None,
                error: None,
                log: VecDeque::new(),
                log_capacity: log_capacity.max(1),
                progress: JobProgress::default(),
                question: None,
                answer_tx: None,
                cancelled: false,
                start_date: None,
                end_date: None,
            }),
            state_tx,
        })
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn is_serialized(&self) -> bool {
        self.serialized
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    pub fn error(&self) -> Option<JobError> {
        self.inner.lock().error.clone()
    }

    pub fn log(&self) -> Vec<LogEvent> {
        self.inner.lock().log.iter().cloned().collect()
    }

    pub fn progress(&self) -> JobProgress {
        self.inner.lock().progress.clone()
    }

    pub fn question(&self) -> Option<Value> {
        self.inner.lock().question.clone()
    }

    pub fn start_date(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().end_date
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Request cooperative cancellation. A job parked in `ask` is woken with
    /// a cancellation error; a running job observes the flag at its next
    /// check point.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        // Dropping the sender fails the worker's pending receive.
        inner.answer_tx = None;
    }

    /// Deliver the answer to a pending question. Fails when no question is
    /// pending, or with a cancellation error when the worker is gone.
    pub fn answer(&self, value: Value) -> Result<(), JobError> {
        let tx = {
            let mut inner = self.inner.lock();
            inner.answer_tx.take().ok_or(JobError::NoPendingQuestion)?
        };
        tx.send(value).map_err(|_| JobError::Cancelled)
    }

    /// Await the terminal state, then surface the recorded outcome.
    pub async fn join(&self) -> Result<(), JobError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            if *rx.borrow_and_update() == JobState::Finished {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// `join` bounded by `timeout`. The timeout error goes to the caller;
    /// the job itself is unaffected.
    pub async fn join_timeout(&self, timeout: Duration) -> Result<(), JobError> {
        tokio::time::timeout(timeout, self.join())
            .await
            .map_err(|_| JobError::JoinTimeout(timeout))?
    }

    /// Await a specific state. Returns false when the job finished without
    /// ever reaching it.
    pub async fn wait_for_state(&self, state: JobState) -> bool {
        let mut rx = self.state_tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current == state {
                return true;
            }
            if current == JobState::Finished {
                return false;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow() == state;
            }
        }
    }

    /// Immutable snapshot for persistence and external inspection.
    pub fn snapshot(&self) -> JobStatusSnapshot {
        let inner = self.inner.lock();
        JobStatusSnapshot {
            job_type: self.job_type.clone(),
            state: inner.state,
            request: self.request.clone(),
            error: inner.error.as_ref().map(|e| e.to_string()),
            log: inner.log.iter().cloned().collect(),
            progress: inner.progress.clone(),
            start_date: inner.start_date,
            end_date: inner.end_date,
            isolated: self.isolated,
            serialized: self.serialized,
        }
    }

    // --- transitions driven by the scheduler / worker ---

    pub(crate) fn mark_started(&self) {
        let mut inner = self.inner.lock();
        inner.state = JobState::Running;
        inner.start_date = Some(Utc::now());
        drop(inner);
        self.state_tx.send_replace(JobState::Running);
    }

    pub(crate) fn mark_finished(&self, error: Option<JobError>) {
        let mut inner = self.inner.lock();
        if inner.state == JobState::Finished {
            return;
        }
        inner.state = JobState::Finished;
        inner.error = error;
        inner.end_date = Some(Utc::now());
        inner.question = None;
        inner.answer_tx = None;
        drop(inner);
        self.state_tx.send_replace(JobState::Finished);
    }

    /// Park the job on a question. Returns the receiver the worker awaits;
    /// state is `Waiting` until `answer` (or `cancel`) resolves it.
    pub(crate) fn begin_ask(&self, question: Value) -> Result<oneshot::Receiver<Value>, JobError> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return Err(JobError::Cancelled);
        }
        inner.question = Some(question);
        inner.answer_tx = Some(tx);
        inner.state = JobState::Waiting;
        drop(inner);
        self.state_tx.send_replace(JobState::Waiting);
        Ok(rx)
    }

    /// Resume after an answered question.
    pub(crate) fn resume_running(&self) {
        let mut inner = self.inner.lock();
        inner.question = None;
        inner.state = JobState::Running;
        drop(inner);
        self.state_tx.send_replace(JobState::Running);
    }

    pub(crate) fn push_log(&self, level: LogLevel, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.log.len() == inner.log_capacity {
            inner.log.pop_front();
        }
        inner.log.push_back(LogEvent {
            ts: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub(crate) fn set_progress(&self, message: impl Into<String>, done: usize, total: usize) {
        let mut inner = self.inner.lock();
        inner.progress = JobProgress {
            message: message.into(),
            done,
            total,
        };
    }
}

/// Serializable point-in-time view of a job status. This is what the status
/// store persists and what external status queries return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub job_type: String,
    pub state: JobState,
    pub request: Request,
    pub error: Option<String>,
    pub log: Vec<LogEvent>,
    pub progress: JobProgress,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub isolated: bool,
    pub serialized: bool,
}
