//! The message broker, behind a trait.
//!
//! The worker needs exactly three things from a broker: create a topic on
//! demand, publish a payload, and consume one message at a time with an
//! explicit commit of the read position. Anything beyond "at-least-once,
//! consumer commits its own position" is a backend detail the worker must
//! not rely on.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

pub use memory::InMemoryBroker;
#[cfg(feature = "nats")]
pub use nats::NatsBroker;

/// Errors surfaced by a [`Broker`] implementation.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("broker connection error: {0}")]
    Connect(String),

    /// A publish did not reach the broker.
    #[error("publish to '{topic}' failed: {detail}")]
    Publish {
        /// The target topic.
        topic: String,
        /// Backend diagnostic.
        detail: String,
    },

    /// A subscription could not be created.
    #[error("subscribe to '{topic}' failed: {detail}")]
    Subscribe {
        /// The requested topic.
        topic: String,
        /// Backend diagnostic.
        detail: String,
    },

    /// The subscription or broker is gone.
    #[error("broker connection closed")]
    Closed,
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the message was consumed from.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Backend position of this message within the subscription, used by
    /// [`Subscription::commit`].
    pub offset: u64,
}

/// A publish/subscribe broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Creates `topic` if the backend distinguishes creation from use.
    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError>;

    /// Publishes `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Opens a consuming subscription on `topic` for the consumer group
    /// `group`. Members of one group share the group's committed position.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A single consumer's view of a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message. `Ok(None)` means the subscription is
    /// closed and no further messages will arrive.
    async fn next(&mut self) -> Result<Option<Delivery>, BrokerError>;

    /// Commits the group's read position past `delivery`. Messages at or
    /// before a committed position are not redelivered to the group.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}
