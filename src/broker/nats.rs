//! NATS broker backend.
//!
//! Commands and responses map to subjects; the response consumer joins a
//! queue group so multiple worker instances share one stream of responses.
//! Core NATS delivers each message to one member of the group at most once
//! and keeps no consumer offsets, so [`Subscription::commit`] is a no-op
//! here; redelivery-after-crash requires a persistence layer in front of
//! the subject.

use async_trait::async_trait;
use futures::StreamExt;

use super::{Broker, BrokerError, Delivery, Subscription};

/// [`Broker`] over a NATS connection.
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    /// Connects to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_topic(&self, _topic: &str) -> Result<(), BrokerError> {
        // Subjects exist by use.
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.client
            .publish(topic.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                detail: e.to_string(),
            })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let subscriber = self
            .client
            .queue_subscribe(topic.to_string(), group.to_string())
            .await
            .map_err(|e| BrokerError::Subscribe {
                topic: topic.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Box::new(NatsSubscription {
            subscriber,
            topic: topic.to_string(),
            delivered: 0,
        }))
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
    topic: String,
    delivered: u64,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, BrokerError> {
        match self.subscriber.next().await {
            Some(message) => {
                let offset = self.delivered;
                self.delivered += 1;
                Ok(Some(Delivery {
                    topic: self.topic.clone(),
                    payload: message.payload.to_vec(),
                    offset,
                }))
            }
            None => Ok(None),
        }
    }

    async fn commit(&mut self, _delivery: &Delivery) -> Result<(), BrokerError> {
        Ok(())
    }
}
