//! The task execution error taxonomy.
//!
//! Internal diagnostics are logged in full but never surfaced to the
//! workflow engine. Every fatal variant maps to a fixed, sanitized message
//! via [`ExecutionError::task_facing_message`]; process modelers see that
//! text as the task's failure reason and nothing more.

use thiserror::Error;

use crate::queue::QueueError;

/// Why a task could not be carried through to a published command.
///
/// Per-parameter overlay problems are not part of this taxonomy; the
/// translator recovers from those by skipping the parameter. Everything
/// here fails the whole task.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The task payload was missing, not a string, or not valid JSON.
    #[error("malformed task payload: {detail}")]
    MalformedTask {
        /// Internal diagnostic, logged only.
        detail: String,
    },

    /// The target device or service could not be resolved, or the tenant
    /// lacks execution permission.
    #[error("cannot resolve command target: {detail}")]
    Resolution {
        /// Internal diagnostic, logged only.
        detail: String,
    },

    /// The resolved service names no protocol handler topic.
    #[error("service '{service_id}' has no protocol handler topic")]
    Routing {
        /// The unroutable service.
        service_id: String,
    },

    /// A declared service input failed to parse, validate, or format.
    #[error("cannot format field '{field}': {detail}")]
    Format {
        /// Task-facing name of the offending field.
        field: String,
        /// Internal diagnostic, logged only.
        detail: String,
    },

    /// The redelivery guard tripped under at-most-once delivery.
    #[error("task '{task_id}' was already dispatched once")]
    Timeout {
        /// The redelivered task.
        task_id: String,
    },

    /// The command could not be handed to the broker.
    #[error("cannot publish command to '{topic}': {detail}")]
    Publish {
        /// The protocol handler topic.
        topic: String,
        /// Internal diagnostic, logged only.
        detail: String,
    },

    /// The task queue itself rejected or dropped a call.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ExecutionError {
    /// The sanitized failure reason reported to the workflow engine.
    ///
    /// Deliberately free of ids, URLs, and parser output; the full error
    /// goes to the log, not to the process modeler.
    pub fn task_facing_message(&self) -> &'static str {
        match self {
            Self::MalformedTask { .. } => "invalid task payload (json)",
            Self::Resolution { .. } => "unable to resolve device or service",
            Self::Routing { .. } => "empty protocol topic",
            Self::Format { .. } => "internal format error (inconsistent metadata?)",
            Self::Timeout { .. } => "communication timeout",
            Self::Publish { .. } => "unable to publish command",
            Self::Queue(_) => "task queue unavailable",
        }
    }
}
