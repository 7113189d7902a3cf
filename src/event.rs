//! In-process notification bus for job lifecycle events.
//!
//! Publishing is fire-and-forget: the scheduler and running jobs emit
//! envelopes, a single external consumer drains the receiver. A dropped
//! receiver downgrades every emit to a logged no-op.

use crate::job::Request;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc::{channel, Receiver, SendError, Sender};
use tracing::debug;

/// Severity attached to job log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Published exactly once, before any progress or log event of the job.
    Started { request: Request },
    Progress {
        message: String,
        done: usize,
        total: usize,
    },
    Log { level: LogLevel, message: String },
    /// The job asked a question and is suspended awaiting an answer.
    Waiting { question: Value },
    /// Last chance for listeners to react before the status is persisted.
    Finishing { error: Option<String> },
    /// Terminal notification; published strictly after `Finishing`.
    Finished { error: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEventEnvelope {
    pub ts: DateTime<Utc>,
    /// Hierarchical job id, when the request declared one.
    pub job_id: Option<Vec<String>>,
    pub job_type: String,
    pub event: JobEvent,
}

impl JobEventEnvelope {
    pub fn now(job_id: Option<Vec<String>>, job_type: impl Into<String>, event: JobEvent) -> Self {
        Self {
            ts: Utc::now(),
            job_id,
            job_type: job_type.into(),
            event,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: Sender<JobEventEnvelope>,
}

impl EventBus {
    pub fn new_pair() -> (Self, Receiver<JobEventEnvelope>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, envelope: JobEventEnvelope) -> Result<(), SendError<JobEventEnvelope>> {
        self.sender.send(envelope)
    }

    /// Emit without surfacing a closed-channel error; event publication never
    /// affects job outcome.
    pub fn emit_best_effort(&self, envelope: JobEventEnvelope) {
        if self.emit(envelope).is_err() {
            debug!("event bus receiver dropped, discarding job event");
        }
    }
}
