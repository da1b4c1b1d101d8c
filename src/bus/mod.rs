//! Message bus abstraction.
//!
//! Stages talk to each other through topics. Each stage pulls from one
//! subscription and settles every delivery in one of three ways:
//!
//! - **ack**: done, never deliver again.
//! - **nack**: failed, deliver again. After the subscription's maximum number
//!   of attempts the message moves to the dead-letter topic instead.
//! - **reject**: the message can never succeed, dead-letter it now.
//!
//! Delivery is at-least-once. A delivery that is neither acked nor nacked
//! before its ack deadline is treated as a nack.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod health;
mod memory;
pub mod topology;

pub use health::{Alert, HealthThresholds, check_health};
pub use memory::{MemoryBus, SubscriptionConfig};
pub use topology::{Topology, TopicSpec};

/// Attribute naming the subscription a dead-lettered message came from.
pub const ATTR_DEAD_LETTER_SOURCE: &str = "dead_letter_source_subscription";

/// Attribute recording how many deliveries a dead-lettered message had.
pub const ATTR_DEAD_LETTER_ATTEMPTS: &str = "dead_letter_delivery_attempts";

/// Attribute recording why a message was dead-lettered.
pub const ATTR_DEAD_LETTER_REASON: &str = "dead_letter_reason";

/// Errors from bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic already exists: {0}")]
    TopicExists(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("subscription already exists: {0}")]
    SubscriptionExists(String),

    /// The delivery was already settled or its ack deadline passed.
    #[error("unknown ack id {ack_id} on subscription {subscription}")]
    UnknownAckId { subscription: String, ack_id: AckId },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Bus-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for settling one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckId(pub u64);

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A published message as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub publish_time: DateTime<Utc>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_attempt: u32,
}

/// A message handed to a subscriber, awaiting settlement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub ack_id: AckId,
    pub message: Message,
}

/// Publishes raw message bodies to topics.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<MessageId>> + Send;
}

/// Pulls and settles deliveries from subscriptions.
pub trait Subscriber: Send + Sync {
    /// Waits for the next delivery. Returns `None` once `ctx` is cancelled.
    fn receive(
        &self,
        ctx: &CancellationToken,
        subscription: &str,
    ) -> impl Future<Output = Result<Option<Delivery>>> + Send;

    fn ack(&self, subscription: &str, ack_id: AckId) -> impl Future<Output = Result<()>> + Send;

    fn nack(&self, subscription: &str, ack_id: AckId) -> impl Future<Output = Result<()>> + Send;

    fn reject(
        &self,
        subscription: &str,
        ack_id: AckId,
        reason: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Point-in-time backlog figures for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Messages waiting for delivery.
    pub undelivered: usize,
    /// Messages delivered but not yet settled.
    pub in_flight: usize,
    /// Age of the oldest message not yet acked.
    pub oldest_unacked_age: Option<Duration>,
}

impl SubscriptionStats {
    pub fn backlog(&self) -> usize {
        self.undelivered + self.in_flight
    }
}

/// Exposes backlog figures for monitoring.
pub trait SubscriptionMonitor: Send + Sync {
    fn subscription_stats(
        &self,
        subscription: &str,
    ) -> impl Future<Output = Result<SubscriptionStats>> + Send;
}
