//! The command payload exchanged with remote protocol handlers.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::policy::CompletionStrategy;
use crate::types::metadata::ServiceMetadata;

/// The wire unit handed to the broker: routing ids plus the command itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Target device instance id.
    pub device_id: String,
    /// Target service id.
    pub service_id: String,
    /// The command payload, opaque to broker-side routing.
    pub value: ProtocolMessage,
}

impl Envelope {
    /// Builds an envelope, rejecting empty routing ids.
    pub fn new(
        device_id: String,
        service_id: String,
        value: ProtocolMessage,
    ) -> Result<Self, InvalidEnvelope> {
        if device_id.is_empty() || service_id.is_empty() {
            return Err(InvalidEnvelope);
        }
        Ok(Self { device_id, service_id, value })
    }
}

/// An envelope was constructed with an empty device or service id.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("envelope requires non-empty device and service ids")]
pub struct InvalidEnvelope;

/// The command payload understood by a remote protocol handler, and the
/// shape of the response it publishes back.
///
/// Every field the response side needs travels with the message itself:
/// the locking worker id, the completion strategy tag that lets an
/// optimistic response short-circuit, and the producer timestamp feeding
/// the staleness check. Response parsing is lenient; absent fields default
/// so one malformed handler cannot take the consumption loop down.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolMessage {
    /// Id of the worker process that locked the task.
    pub worker_id: String,
    /// Completion strategy active when the command was dispatched.
    pub completion_strategy: CompletionStrategy,
    /// Resolved device endpoint.
    pub device_url: String,
    /// Resolved service endpoint.
    pub service_url: String,
    /// The task this command belongs to.
    pub task_id: String,
    /// Target device instance id.
    pub device_instance_id: String,
    /// Target service id.
    pub service_id: String,
    /// Name of the task output variable the response completes into.
    pub output_name: String,
    /// Producer-side wall clock as a unix-seconds decimal string. Empty or
    /// unparseable values count as infinitely old.
    pub time: String,
    /// Snapshot of the service metadata, so the response side can map
    /// protocol parts back to declared outputs without a directory call.
    pub service: ServiceMetadata,
    /// Codec-formatted fields, one per matched service input (command) or
    /// output (response).
    pub protocol_parts: Vec<ProtocolPart>,
}

impl ProtocolMessage {
    /// Renders `now` the way [`ProtocolMessage::time`] carries it.
    pub fn format_time(now: DateTime<Utc>) -> String {
        now.timestamp().to_string()
    }

    /// True when the message's producer timestamp lies `horizon` or more
    /// before `now`. Missing and malformed timestamps are treated as
    /// infinitely old.
    pub fn older_than(&self, horizon: Duration, now: DateTime<Utc>) -> bool {
        let Ok(seconds) = self.time.parse::<i64>() else {
            return true;
        };
        let Some(produced) = Utc.timestamp_opt(seconds, 0).single() else {
            return true;
        };
        let age = now.signed_duration_since(produced);
        match chrono::Duration::from_std(horizon) {
            Ok(horizon) => age >= horizon,
            // A horizon beyond chrono's range can never be exceeded.
            Err(_) => false,
        }
    }
}

/// One codec-formatted field of a protocol message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProtocolPart {
    /// Wire-segment name declared by the service field.
    pub name: String,
    /// The formatted payload.
    pub value: String,
}
