//! Correlates protocol handler responses back into task completions.
//!
//! Protocol handlers answer on a shared response topic with the same
//! message shape they were sent, parts now carrying output values. Every
//! fact needed for correlation travels inside the message itself, so this
//! side needs no directory and no state beyond the queue client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::policy::{Completer, QosStrategy};
use crate::types::command::CommandRequest;
use crate::types::protocol::ProtocolMessage;
use crate::types::task::TaskOutput;
use crate::types::value::VarMap;

/// What became of one consumed response message.
///
/// Everything except [`Retry`](Self::Retry) is final for the message; the
/// consumption loop commits its read position and moves on. `Retry` means
/// the queue was unreachable and the message must be redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The task was completed with the response's outputs.
    Resolved,
    /// The dispatch side already completed the task optimistically.
    AlreadyCompleted,
    /// The response arrived after the lock window; completing now would
    /// race the queue's own retry.
    Stale,
    /// The payload did not parse; it cannot be attributed to any task.
    Undecodable,
    /// A declared output failed to decode; the response is unusable.
    UnusableOutput,
    /// The queue was unreachable; the message must come back.
    Retry,
}

impl CorrelationOutcome {
    /// True when the consumption loop may commit the message.
    pub fn commits(self) -> bool {
        !matches!(self, Self::Retry)
    }
}

/// The response side of the engine: decodes, filters, and completes.
pub struct Correlator {
    completer: Completer,
    codec: Arc<dyn Codec>,
    qos: QosStrategy,
    lock_duration: Duration,
}

impl Correlator {
    /// A correlator filtering staleness against `lock_duration`, the same
    /// window tasks are locked with at fetch time.
    pub fn new(
        completer: Completer,
        codec: Arc<dyn Codec>,
        qos: QosStrategy,
        lock_duration: Duration,
    ) -> Self {
        Self { completer, codec, qos, lock_duration }
    }

    /// Runs one response payload through the correlation state machine.
    pub async fn handle(&self, payload: &[u8]) -> CorrelationOutcome {
        let message: ProtocolMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "dropping undecodable response");
                return CorrelationOutcome::Undecodable;
            }
        };

        if message.completion_strategy.completes_on_dispatch() {
            debug!(task_id = %message.task_id, "response for optimistically completed task");
            return CorrelationOutcome::AlreadyCompleted;
        }

        if self.qos.drops_stale_responses()
            && message.older_than(self.lock_duration, Utc::now())
        {
            debug!(task_id = %message.task_id, time = %message.time, "dropping stale response");
            return CorrelationOutcome::Stale;
        }

        let mut outputs = VarMap::new();
        for declared in &message.service.outputs {
            let Some(part) =
                message.protocol_parts.iter().find(|p| p.name == declared.segment)
            else {
                continue;
            };
            match self.codec.decode(declared, &part.value) {
                Ok(value) => {
                    outputs.insert(declared.name.clone(), value);
                }
                Err(error) => {
                    warn!(
                        task_id = %message.task_id,
                        field = %declared.name,
                        %error,
                        "dropping response with undecodable output"
                    );
                    return CorrelationOutcome::UnusableOutput;
                }
            }
        }

        let mut document = CommandRequest::from_outputs(outputs);
        document.service_id = message.service_id.clone();
        let output = TaskOutput { name: message.output_name.clone(), value: document };

        match self
            .completer
            .complete(&message.task_id, &message.worker_id, Some(&output))
            .await
        {
            Ok(()) => {
                info!(task_id = %message.task_id, "completed task from response");
                CorrelationOutcome::Resolved
            }
            Err(error) => {
                warn!(task_id = %message.task_id, %error, "queue unavailable, leaving response for redelivery");
                CorrelationOutcome::Retry
            }
        }
    }
}
