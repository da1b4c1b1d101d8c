//! Topic and subscription layout of the notification pipeline.
//!
//! ```text
//! ingestion-jobs ──┐
//!                  ├─► event producer ─► notification-events ─► push delivery ─► chime-delivery ─► email worker
//! batch-updates ───┘
//! ```
//!
//! Every main subscription dead-letters into `<topic>-dead-letter`, which has
//! its own subscription so operators can inspect and replay.

use std::time::Duration;

use tracing::info;

use super::{MemoryBus, Result, SubscriptionConfig};

pub const INGESTION_JOBS_TOPIC: &str = "ingestion-jobs";
pub const BATCH_UPDATES_TOPIC: &str = "batch-updates";
pub const NOTIFICATION_EVENTS_TOPIC: &str = "notification-events";
pub const EMAIL_TOPIC: &str = "chime-delivery";

/// Deliveries before a message is moved to its dead-letter topic.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

const DEAD_LETTER_SUFFIX: &str = "-dead-letter";
const SUBSCRIPTION_SUFFIX: &str = "-sub";

/// One main topic with its subscription and dead-letter pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub topic: String,
    pub subscription: String,
    pub dead_letter_topic: String,
    pub dead_letter_subscription: String,
}

impl TopicSpec {
    pub fn new(topic: &str) -> Self {
        let dead_letter_topic = format!("{topic}{DEAD_LETTER_SUFFIX}");
        TopicSpec {
            topic: topic.to_string(),
            subscription: format!("{topic}{SUBSCRIPTION_SUFFIX}"),
            dead_letter_subscription: format!("{dead_letter_topic}{SUBSCRIPTION_SUFFIX}"),
            dead_letter_topic,
        }
    }
}

/// The full set of topics a deployment needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub topics: Vec<TopicSpec>,
    pub ack_deadline: Duration,
}

impl Default for Topology {
    fn default() -> Self {
        Topology {
            topics: [
                INGESTION_JOBS_TOPIC,
                BATCH_UPDATES_TOPIC,
                NOTIFICATION_EVENTS_TOPIC,
                EMAIL_TOPIC,
            ]
            .into_iter()
            .map(TopicSpec::new)
            .collect(),
            ack_deadline: Duration::from_secs(60),
        }
    }
}

impl Topology {
    pub fn with_ack_deadline(mut self, deadline: Duration) -> Self {
        self.ack_deadline = deadline;
        self
    }

    /// The layout for `topic`, if it is part of this topology.
    pub fn spec(&self, topic: &str) -> Option<&TopicSpec> {
        self.topics.iter().find(|t| t.topic == topic)
    }

    /// Subscription name consuming `topic`.
    ///
    /// Unknown topics fall back to the naming convention.
    pub fn subscription_for(&self, topic: &str) -> String {
        self.spec(topic)
            .map(|t| t.subscription.clone())
            .unwrap_or_else(|| TopicSpec::new(topic).subscription)
    }

    pub fn main_subscriptions(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.subscription.as_str())
    }

    pub fn dead_letter_subscriptions(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.dead_letter_subscription.as_str())
    }

    /// Creates every topic and subscription on `bus`. Dead-letter topics are
    /// created first so main subscriptions can point at them.
    pub async fn provision(&self, bus: &MemoryBus) -> Result<()> {
        for spec in &self.topics {
            bus.create_topic(&spec.dead_letter_topic).await?;
            bus.create_subscription(SubscriptionConfig::new(
                &spec.dead_letter_subscription,
                &spec.dead_letter_topic,
            ))
            .await?;

            bus.create_topic(&spec.topic).await?;
            bus.create_subscription(
                SubscriptionConfig::new(&spec.subscription, &spec.topic)
                    .with_dead_letter_topic(&spec.dead_letter_topic)
                    .with_max_delivery_attempts(MAX_DELIVERY_ATTEMPTS)
                    .with_ack_deadline(self.ack_deadline),
            )
            .await?;
            info!(topic = %spec.topic, subscription = %spec.subscription, "provisioned topic");
        }
        Ok(())
    }
}
