//! Dispatch and completion policies.
//!
//! Two independent knobs change the correctness contract of a dispatch:
//! the QoS strategy decides whether a physical command may ever be sent
//! twice for one task, and the completion strategy decides whether the
//! workflow waits for the command's response. The decision logic lives here
//! as plain methods so it can be tested without any transport.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::queue::{QueueError, TaskQueue};
use crate::types::task::TaskOutput;

/// Whether a physical command may be delivered more than once per task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosStrategy {
    /// `<=`: at most one physical command per task id. Re-delivered tasks
    /// are failed fast, and dispatches are marked at the queue before the
    /// publish.
    #[serde(rename = "<=")]
    AtMostOnce,
    /// `>=`: a task may be dispatched again when re-delivered; late
    /// responses are filtered by staleness instead.
    #[default]
    #[serde(rename = ">=")]
    AtLeastOnce,
}

impl QosStrategy {
    /// True when a task with this retry count must be failed without
    /// dispatching: under at-most-once, a retry count of exactly one marks
    /// a task whose previous attempt already published.
    pub fn rejects_redelivery(self, retries: Option<i64>) -> bool {
        self == Self::AtMostOnce && retries == Some(1)
    }

    /// True when the retry count must be written to the queue before the
    /// publish, closing the crash window between the two.
    pub fn marks_before_publish(self) -> bool {
        self == Self::AtMostOnce
    }

    /// True when responses older than the lock window must be dropped.
    pub fn drops_stale_responses(self) -> bool {
        self == Self::AtLeastOnce
    }

    /// The configuration spelling of this strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AtMostOnce => "<=",
            Self::AtLeastOnce => ">=",
        }
    }
}

impl FromStr for QosStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<=" => Ok(Self::AtMostOnce),
            ">=" => Ok(Self::AtLeastOnce),
            other => Err(UnknownStrategy { kind: "qos", value: other.to_string() }),
        }
    }
}

impl std::fmt::Display for QosStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a task completes on dispatch or waits for its response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStrategy {
    /// Complete immediately after a successful publish; the eventual
    /// response is discarded as a no-op.
    Optimistic,
    /// Keep the task locked; only a correlated response completes it.
    #[default]
    Pessimistic,
}

impl CompletionStrategy {
    /// True when the task is completed right after the publish.
    pub fn completes_on_dispatch(self) -> bool {
        self == Self::Optimistic
    }

    /// The configuration spelling of this strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Pessimistic => "pessimistic",
        }
    }
}

impl FromStr for CompletionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optimistic" => Ok(Self::Optimistic),
            "pessimistic" => Ok(Self::Pessimistic),
            other => Err(UnknownStrategy { kind: "completion", value: other.to_string() }),
        }
    }
}

impl std::fmt::Display for CompletionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy string that matches no known spelling.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} strategy '{value}'")]
pub struct UnknownStrategy {
    /// Which knob was being parsed.
    pub kind: &'static str,
    /// The offending spelling.
    pub value: String,
}

/// Task completion with the grace delay and the rejection fallback applied.
///
/// Both completion paths go through here: the dispatch-side optimistic
/// completion and the correlator's response-driven completion. A completion
/// the queue rejects is converted into an explicit `fail` carrying the
/// queue's own response text, so a rejected completion is never silently
/// lost.
#[derive(Clone)]
pub struct Completer {
    queue: Arc<dyn TaskQueue>,
    grace: Duration,
}

impl Completer {
    /// Wraps `queue`, delaying every completion by `grace`.
    pub fn new(queue: Arc<dyn TaskQueue>, grace: Duration) -> Self {
        Self { queue, grace }
    }

    /// Completes `task_id`, falling back to `fail` when the queue rejects
    /// the completion. Transport errors are returned to the caller, which
    /// decides between retrying and dropping.
    pub async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        output: Option<&TaskOutput>,
    ) -> Result<(), QueueError> {
        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        match self.queue.complete(task_id, worker_id, output).await {
            Ok(()) => {
                debug!(task_id, "task completed");
                Ok(())
            }
            Err(QueueError::Rejected { status, body }) => {
                warn!(task_id, status, "completion rejected by the queue, failing task");
                self.queue.fail(task_id, worker_id, &body).await
            }
            Err(other) => Err(other),
        }
    }

    /// Fails `task_id` with `error_message`. No grace delay; failure should
    /// reach the engine as soon as it is known.
    pub async fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<(), QueueError> {
        self.queue.fail(task_id, worker_id, error_message).await
    }
}
