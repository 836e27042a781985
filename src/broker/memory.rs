//! In-process broker backend.
//!
//! Backs tests and single-process demos. Per topic, one append-only log
//! plus one committed cursor per consumer group: a subscription resumes
//! from its group's committed position, so every delivery that was never
//! committed reappears on the next subscribe. That is the same
//! at-least-once contract the engine gets from an external broker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::{Broker, BrokerError, Delivery, Subscription};

#[derive(Default)]
struct TopicState {
    log: RwLock<Vec<Arc<[u8]>>>,
    committed: RwLock<HashMap<String, u64>>,
    arrived: Notify,
}

/// An in-process [`Broker`] with per-group committed cursors.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: DashMap<String, Arc<TopicState>>,
}

impl InMemoryBroker {
    /// An empty broker with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<TopicState> {
        self.topics.entry(name.to_string()).or_default().clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_topic(&self, topic: &str) -> Result<(), BrokerError> {
        self.topic(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let state = self.topic(topic);
        state.log.write().push(payload.into());
        state.arrived.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let state = self.topic(topic);
        let position = state.committed.read().get(group).copied().unwrap_or(0);
        Ok(Box::new(MemorySubscription {
            state,
            topic: topic.to_string(),
            group: group.to_string(),
            position,
        }))
    }
}

struct MemorySubscription {
    state: Arc<TopicState>,
    topic: String,
    group: String,
    position: u64,
}

impl MemorySubscription {
    fn take_next(&mut self) -> Option<Delivery> {
        let log = self.state.log.read();
        let payload = log.get(self.position as usize)?;
        let delivery = Delivery {
            topic: self.topic.clone(),
            payload: payload.to_vec(),
            offset: self.position,
        };
        self.position += 1;
        Some(delivery)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, BrokerError> {
        loop {
            if let Some(delivery) = self.take_next() {
                return Ok(Some(delivery));
            }
            // Arm the waiter before the re-check so a publish racing this
            // gap cannot be missed. The waiter borrows a local handle, not
            // `self`, which the re-check needs mutably.
            let state = Arc::clone(&self.state);
            let arrived = state.arrived.notified();
            if let Some(delivery) = self.take_next() {
                return Ok(Some(delivery));
            }
            arrived.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut committed = self.state.committed.write();
        let cursor = committed.entry(self.group.clone()).or_insert(0);
        *cursor = (*cursor).max(delivery.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn expect_next(sub: &mut Box<dyn Subscription>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("timed out waiting for a delivery")
            .expect("subscription errored")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let broker = InMemoryBroker::new();
        broker.publish("t", b"one").await.unwrap();
        broker.publish("t", b"two").await.unwrap();

        let mut sub = broker.subscribe("t", "g").await.unwrap();
        assert_eq!(expect_next(&mut sub).await.payload, b"one");
        assert_eq!(expect_next(&mut sub).await.payload, b"two");
    }

    #[tokio::test]
    async fn uncommitted_deliveries_reappear_on_resubscribe() {
        let broker = InMemoryBroker::new();
        broker.publish("t", b"m").await.unwrap();

        let mut first = broker.subscribe("t", "g").await.unwrap();
        let delivery = expect_next(&mut first).await;
        drop(first);

        let mut second = broker.subscribe("t", "g").await.unwrap();
        assert_eq!(expect_next(&mut second).await, delivery);
    }

    #[tokio::test]
    async fn committed_deliveries_are_not_redelivered() {
        let broker = InMemoryBroker::new();
        broker.publish("t", b"a").await.unwrap();
        broker.publish("t", b"b").await.unwrap();

        let mut first = broker.subscribe("t", "g").await.unwrap();
        let a = expect_next(&mut first).await;
        first.commit(&a).await.unwrap();
        drop(first);

        let mut second = broker.subscribe("t", "g").await.unwrap();
        assert_eq!(expect_next(&mut second).await.payload, b"b");
    }

    #[tokio::test]
    async fn groups_have_independent_cursors() {
        let broker = InMemoryBroker::new();
        broker.publish("t", b"m").await.unwrap();

        let mut consumer = broker.subscribe("t", "workers").await.unwrap();
        let delivery = expect_next(&mut consumer).await;
        consumer.commit(&delivery).await.unwrap();

        let mut observer = broker.subscribe("t", "observers").await.unwrap();
        assert_eq!(expect_next(&mut observer).await.payload, b"m");
    }

    #[tokio::test]
    async fn next_wakes_up_for_a_late_publish() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut sub = broker.subscribe("t", "g").await.unwrap();

        let publisher = Arc::clone(&broker);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", b"late").await.unwrap();
        });

        assert_eq!(expect_next(&mut sub).await.payload, b"late");
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_publishes_are_never_lost() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut sub = broker.subscribe("t", "g").await.unwrap();

        let publisher = Arc::clone(&broker);
        let handle = tokio::spawn(async move {
            for n in 0u32..200 {
                publisher.publish("t", &n.to_be_bytes()).await.unwrap();
                if n % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        // Every receive parks and re-arms the waiter; none of the racing
        // publishes may slip through the gap.
        for n in 0u32..200 {
            assert_eq!(expect_next(&mut sub).await.payload, n.to_be_bytes());
        }
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn ensure_topic_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.ensure_topic("t").await.unwrap();
        broker.ensure_topic("t").await.unwrap();
        broker.publish("t", b"m").await.unwrap();
        let mut sub = broker.subscribe("t", "g").await.unwrap();
        assert_eq!(expect_next(&mut sub).await.payload, b"m");
    }
}
