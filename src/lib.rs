//! Bridge between a workflow engine's external-task queue and device
//! protocol handlers on a message broker.
//!
//! The worker claims external tasks in batches, translates each task's
//! variables into a device command, resolves the target device and service
//! against a metadata directory, encodes the command for the service's wire
//! format, and publishes it to the protocol topic. A separate consumer reads
//! protocol responses from the broker, decodes the service outputs, and
//! completes the originating task at the queue.
//!
//! Delivery semantics are governed by two knobs: the QoS strategy (`"<="`
//! at most once, `">="` at least once) and the completion strategy
//! (`optimistic` completes right after publishing, `pessimistic` waits for
//! the correlated response).
//!
//! # Module Organization
//!
//! - [`worker`] - Task intake loop and dispatch pipeline
//! - [`consumer`] - Response intake loop with commit-after-handle semantics
//! - [`translate`] - Task variables to command request
//! - [`builder`] - Command request to routed protocol envelope
//! - [`correlate`] - Protocol response back to task completion
//! - [`policy`] - QoS and completion strategies, queue completion calls
//! - [`codec`] - Typed value encoding for service fields
//! - [`queue`] - External-task queue client
//! - [`broker`] - Message broker abstraction and implementations
//! - [`directory`] - Device and service metadata resolution
//! - [`auth`] - OpenID Connect credentials for queue and directory calls
//! - [`config`] - File and environment configuration
//! - [`types`] - Wire and domain types

pub mod auth;
pub mod broker;
pub mod builder;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod correlate;
pub mod directory;
pub mod error;
pub mod overlay;
pub mod policy;
pub mod queue;
pub mod translate;
pub mod types;
pub mod worker;

// Re-exports for ergonomic access
pub use broker::{Broker, BrokerError, Delivery, Subscription};
pub use builder::{CommandBuilder, OutboundCommand};
pub use codec::{Codec, CodecError};
pub use config::{ConfigError, WorkerConfig};
pub use consumer::ResponseConsumer;
pub use correlate::{CorrelationOutcome, Correlator};
pub use directory::{Directory, DirectoryError};
pub use error::ExecutionError;
pub use policy::{Completer, CompletionStrategy, QosStrategy};
pub use queue::{QueueError, TaskQueue};
pub use types::{CommandRequest, Envelope, ProtocolMessage, Task, TaskOutput, VarValue};
pub use worker::{ExecutorOptions, TaskExecutor};
