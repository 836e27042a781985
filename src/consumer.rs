//! The response consumption loop.
//!
//! One long-lived loop reads the shared response topic a message at a time
//! and feeds each payload to the correlator. The read position is committed
//! only after the correlator is done with the message; when the correlator
//! asks for a redelivery, the subscription is dropped and reopened after a
//! backoff so the group's committed position serves the message again.
//! Cancellation is honored between messages only, never between a handled
//! message and its commit.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::correlate::Correlator;

/// Drives the correlator from a broker subscription.
pub struct ResponseConsumer {
    broker: Arc<dyn Broker>,
    correlator: Correlator,
    topic: String,
    group: String,
    backoff: Duration,
}

impl ResponseConsumer {
    /// A consumer reading `topic` as a member of the consumer group
    /// `group`, waiting `backoff` before any resubscribe.
    pub fn new(
        broker: Arc<dyn Broker>,
        correlator: Correlator,
        topic: impl Into<String>,
        group: impl Into<String>,
        backoff: Duration,
    ) -> Self {
        Self {
            broker,
            correlator,
            topic: topic.into(),
            group: group.into(),
            backoff,
        }
    }

    /// Consumes until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(error) = self.broker.ensure_topic(&self.topic).await {
            warn!(topic = %self.topic, %error, "could not ensure response topic");
        }
        info!(topic = %self.topic, group = %self.group, "response consumption started");
        'outer: loop {
            let subscribed = tokio::select! {
                () = cancel.cancelled() => break,
                subscribed = self.broker.subscribe(&self.topic, &self.group) => subscribed,
            };
            let mut subscription = match subscribed {
                Ok(subscription) => subscription,
                Err(error) => {
                    warn!(topic = %self.topic, %error, "subscribe failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(self.backoff) => continue,
                    }
                }
            };

            loop {
                let received = tokio::select! {
                    () = cancel.cancelled() => break 'outer,
                    received = subscription.next() => received,
                };
                match received {
                    Ok(Some(delivery)) => {
                        let outcome = self.correlator.handle(&delivery.payload).await;
                        if !outcome.commits() {
                            warn!(
                                topic = %self.topic,
                                offset = delivery.offset,
                                "leaving response uncommitted for redelivery"
                            );
                            break;
                        }
                        if let Err(error) = subscription.commit(&delivery).await {
                            warn!(topic = %self.topic, %error, "commit failed");
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!(topic = %self.topic, "subscription closed");
                        break;
                    }
                    Err(error) => {
                        warn!(topic = %self.topic, %error, "receive failed");
                        break;
                    }
                }
            }

            // Reopening from the group's committed position is what turns
            // an uncommitted message into a redelivery.
            drop(subscription);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
        info!("response consumption stopped");
    }
}
