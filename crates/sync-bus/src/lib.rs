use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

pub mod topics {
    use sync_types::Destination;

    pub const RAW_ACTIVITY: &str = "raw-activity";
    pub const ACTIVITY_ENRICHMENT: &str = "activity-enrichment";
    pub const ACTIVITY_ENRICHED: &str = "activity-enriched";
    pub const PENDING_INPUT_SCAN: &str = "scheduler.pending-input-scan";

    pub fn job_topic(destination: Destination) -> String {
        format!("job.{}", destination)
    }
}

pub use sync_types::Envelope;

/// Envelope body as it crosses the bus. Always JSON so a single channel
/// type can carry every topic's payload; callers deserialize into their
/// own event type after `recv`.
pub type BusEnvelope = Envelope<Value>;

const TOPIC_CAPACITY: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("topic `{0}` has no active subscribers")]
    NoSubscribers(String),
}

/// A single delivery pulled off a topic, with the redelivery attempt count
/// a consumer needs to honor the retry budget on transient failure.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub envelope: BusEnvelope,
    pub attempt: u32,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, envelope: BusEnvelope) -> Result<(), BusError>;
    fn subscribe(&self, topic: &str) -> Subscription;
}

/// In-process message bus built on `tokio::sync::broadcast`, one channel
/// per topic, created lazily on first use. Redelivery is layered on top
/// via `redeliver_or_dead_letter` rather than inside the channel itself,
/// since broadcast has no concept of acking a delivery.
pub struct BroadcastBus {
    topics: Mutex<HashMap<String, broadcast::Sender<Delivery>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<Delivery> {
        let mut topics = self.topics.lock().expect("bus topic map poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for BroadcastBus {
    async fn publish(&self, topic: &str, envelope: BusEnvelope) -> Result<(), BusError> {
        let tx = self.sender_for(topic);
        let delivery = Delivery {
            topic: topic.to_string(),
            envelope,
            attempt: 1,
        };
        // No active receiver is not an error: a topic may legitimately have
        // no consumer yet at startup. Only surfaced when a caller cares.
        let _ = tx.send(delivery);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        Subscription {
            topic: topic.to_string(),
            rx: self.sender_for(topic).subscribe(),
        }
    }
}

pub struct Subscription {
    pub topic: String,
    rx: broadcast::Receiver<Delivery>,
}

impl Subscription {
    /// Waits for the next delivery. `Lagged` (the consumer fell behind the
    /// channel's ring buffer) is treated as best-effort at-least-once: the
    /// gap is logged and the receiver resumes from the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.rx.recv().await {
                Ok(delivery) => return Some(delivery),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        target: "sync.bus",
                        topic = %self.topic,
                        skipped,
                        "consumer lagged, messages dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Redelivers a failed delivery up to `retry_budget` attempts, then drops it
/// (dead-letters) and logs. Transient errors should call this; permanent
/// errors instead write an outcome and let the message lapse.
pub async fn redeliver_or_dead_letter(
    bus: &dyn MessageBus,
    delivery: Delivery,
    retry_budget: u32,
) -> Result<(), BusError> {
    if delivery.attempt >= retry_budget {
        tracing::warn!(
            target: "sync.bus",
            topic = %delivery.topic,
            attempt = delivery.attempt,
            "dead-lettering message after exhausting retry budget"
        );
        return Ok(());
    }
    let mut redelivered = delivery;
    redelivered.attempt += 1;
    tracing::info!(
        target: "sync.bus",
        topic = %redelivered.topic,
        attempt = redelivered.attempt,
        "redelivering after transient failure"
    );
    bus.publish(&redelivered.topic.clone(), redelivered.envelope)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::Envelope;

    #[tokio::test]
    async fn subscribe_then_publish_delivers() {
        let bus = BroadcastBus::new();
        let mut sub = bus.subscribe(topics::RAW_ACTIVITY);
        bus.publish(
            topics::RAW_ACTIVITY,
            Envelope::new("raw_activity", "test://seed", Value::Null),
        )
        .await
        .unwrap();
        let delivery = sub.recv().await.expect("delivery");
        assert_eq!(delivery.topic, topics::RAW_ACTIVITY);
        assert_eq!(delivery.attempt, 1);
    }

    #[tokio::test]
    async fn redeliver_increments_attempt_until_budget_exhausted() {
        let bus = BroadcastBus::new();
        let mut sub = bus.subscribe(topics::ACTIVITY_ENRICHMENT);
        let first = Delivery {
            topic: topics::ACTIVITY_ENRICHMENT.to_string(),
            envelope: Envelope::new("activity_enrichment", "test://seed", Value::Null),
            attempt: 1,
        };
        redeliver_or_dead_letter(&bus, first, 3).await.unwrap();
        let redelivered = sub.recv().await.expect("redelivered");
        assert_eq!(redelivered.attempt, 2);

        // attempt (2) has now reached the budget (2), so this call dead-letters
        // instead of redelivering.
        redeliver_or_dead_letter(&bus, redelivered, 2).await.unwrap();
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(outcome.is_err(), "expected no further delivery once the retry budget is exhausted");
    }
}
