//! The workflow engine's external-task API, behind a trait.
//!
//! Four operations cover everything this worker needs from the engine:
//! claim a batch, mark a retry count, complete, fail. The REST client in
//! [`rest`] is the production implementation; tests substitute recording
//! fakes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::task::{Task, TaskOutput};

pub mod rest;

pub use rest::RestTaskQueue;

/// Errors surfaced by a [`TaskQueue`] implementation.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The queue answered with a non-success status. Carries the queue's
    /// own response text so a rejected completion can be converted into a
    /// `fail` call with that text as the reason.
    #[error("task queue rejected the call with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The call did not reach the queue or the connection broke.
    #[error("task queue transport error: {0}")]
    Transport(String),

    /// The queue answered with a body this client could not decode.
    #[error("task queue response not decodable: {0}")]
    Decode(String),
}

/// The external-task operations of the workflow engine.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Claims up to `max_tasks` tasks subscribed on `topic`, locking each
    /// for `lock_duration` under `worker_id`.
    async fn fetch_and_lock(
        &self,
        worker_id: &str,
        max_tasks: u32,
        topic: &str,
        lock_duration: Duration,
    ) -> Result<Vec<Task>, QueueError>;

    /// Writes the task's retry count.
    async fn set_retries(&self, task_id: &str, retries: i64) -> Result<(), QueueError>;

    /// Completes the task, optionally writing an output variable.
    ///
    /// `worker_id` must be the id the task was locked under; the queue
    /// rejects completions from a different worker.
    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        output: Option<&TaskOutput>,
    ) -> Result<(), QueueError>;

    /// Fails the task with `error_message`, leaving zero retries so the
    /// engine raises an incident instead of re-queuing.
    async fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<(), QueueError>;
}
