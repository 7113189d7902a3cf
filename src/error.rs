//! Error types for the extension planning and job scheduling engine.

use crate::version::{Version, VersionConstraint};
use std::time::Duration;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Status not found for job id: {0}")]
    StatusNotFound(String),

    #[error("Invalid status key: {0}")]
    InvalidKey(String),

    #[error("Corrupt status record for {key}: {detail}")]
    CorruptRecord { key: String, detail: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Plan resolution errors, raised synchronously from plan computation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Extension not found: {id} ({constraint})")]
    ExtensionNotFound { id: String, constraint: VersionConstraint },

    #[error("Incompatible versions required for {id}: {existing} vs {requested}")]
    IncompatibleVersions {
        id: String,
        existing: VersionConstraint,
        requested: VersionConstraint,
    },

    #[error("Ambiguous target: {id} requested as both {first} and {second}")]
    AmbiguousTarget {
        id: String,
        first: Version,
        second: Version,
    },

    #[error("Extension {0} declares itself as a dependency")]
    SelfDependency(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Repository error: {0}")]
    Repository(String),
}

/// Component registry lookup failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("No component registered for role {role} with hint {hint:?}")]
pub struct ComponentLookupError {
    pub role: &'static str,
    pub hint: String,
}

/// Errors attached to a job's status. Cloneable so the recorded error can be
/// handed to every `join` caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job did not finish within {0:?}")]
    JoinTimeout(Duration),

    #[error("No question is pending on this job")]
    NoPendingQuestion,

    #[error("Plan resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    ComponentLookup(#[from] ComponentLookupError),

    #[error("Plan execution failed: {failed} of {total} actions failed, first: {first}")]
    ExecutionFailed {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("Action failed for {extension}: {detail}")]
    ActionFailed { extension: String, detail: String },

    #[error("Job execution error: {0}")]
    Execution(String),
}

/// Context save/restore failures. Always logged, never fatal to the job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context entry {0} is not supported by any provider")]
    UnsupportedEntry(String),

    #[error("Failed to save context entry {entry}: {detail}")]
    SaveFailed { entry: String, detail: String },

    #[error("Failed to restore context entry {entry}: {detail}")]
    RestoreFailed { entry: String, detail: String },
}

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}
