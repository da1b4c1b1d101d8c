//! In-process bus with at-least-once semantics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{
    ATTR_DEAD_LETTER_ATTEMPTS, ATTR_DEAD_LETTER_REASON, ATTR_DEAD_LETTER_SOURCE, AckId, BusError,
    Delivery, Message, MessageId, Publisher, Result, Subscriber, SubscriptionMonitor,
    SubscriptionStats,
};

/// Fallback wake-up when nothing is in flight.
const IDLE_WAKE: Duration = Duration::from_secs(60);

/// Settings for one subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub name: String,
    pub topic: String,
    /// Where messages go after exhausting their attempts or being rejected.
    /// Without one they are dropped with a warning.
    pub dead_letter_topic: Option<String>,
    pub max_delivery_attempts: u32,
    pub ack_deadline: Duration,
}

impl SubscriptionConfig {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        SubscriptionConfig {
            name: name.into(),
            topic: topic.into(),
            dead_letter_topic: None,
            max_delivery_attempts: super::topology::MAX_DELIVERY_ATTEMPTS,
            ack_deadline: Duration::from_secs(60),
        }
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn with_ack_deadline(mut self, deadline: Duration) -> Self {
        self.ack_deadline = deadline;
        self
    }
}

struct Queued {
    message: Message,
    published_at: Instant,
}

struct InFlight {
    queued: Queued,
    deadline: Instant,
}

struct SubscriptionState {
    config: SubscriptionConfig,
    ready: VecDeque<Queued>,
    in_flight: HashMap<AckId, InFlight>,
}

impl SubscriptionState {
    fn stats(&self, now: Instant) -> SubscriptionStats {
        let oldest = self
            .ready
            .iter()
            .map(|q| q.published_at)
            .chain(self.in_flight.values().map(|f| f.queued.published_at))
            .min();
        SubscriptionStats {
            undelivered: self.ready.len(),
            in_flight: self.in_flight.len(),
            oldest_unacked_age: oldest.map(|t| now.saturating_duration_since(t)),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.deadline).min()
    }
}

#[derive(Default)]
struct BusState {
    /// Topic name to attached subscription names.
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, SubscriptionState>,
}

impl BusState {
    fn subscription_mut(&mut self, name: &str) -> Result<&mut SubscriptionState> {
        self.subscriptions
            .get_mut(name)
            .ok_or_else(|| BusError::SubscriptionNotFound(name.to_string()))
    }

    fn fan_out(&mut self, topic: &str, message: Message, now: Instant) -> Result<()> {
        let attached = self
            .topics
            .get(topic)
            .ok_or_else(|| BusError::TopicNotFound(topic.to_string()))?
            .clone();
        for name in attached {
            if let Some(sub) = self.subscriptions.get_mut(&name) {
                sub.ready.push_back(Queued {
                    message: message.clone(),
                    published_at: now,
                });
            }
        }
        Ok(())
    }

    /// Returns a failed delivery to the queue, or dead-letters it once its
    /// attempts are used up.
    fn redeliver_or_dead_letter(&mut self, subscription: &str, queued: Queued, now: Instant) {
        let Some(sub) = self.subscriptions.get_mut(subscription) else {
            return;
        };
        if queued.message.delivery_attempt >= sub.config.max_delivery_attempts {
            self.dead_letter(subscription, queued, "max delivery attempts exceeded", now);
        } else {
            sub.ready.push_back(queued);
        }
    }

    fn dead_letter(&mut self, subscription: &str, queued: Queued, reason: &str, now: Instant) {
        let dead_letter_topic = self
            .subscriptions
            .get(subscription)
            .and_then(|s| s.config.dead_letter_topic.clone());
        let Some(topic) = dead_letter_topic else {
            warn!(subscription, message_id = %queued.message.id, reason, "dropping message without dead-letter topic");
            return;
        };

        let mut attributes = queued.message.attributes.clone();
        attributes.insert(ATTR_DEAD_LETTER_SOURCE.to_string(), subscription.to_string());
        attributes.insert(
            ATTR_DEAD_LETTER_ATTEMPTS.to_string(),
            queued.message.delivery_attempt.to_string(),
        );
        attributes.insert(ATTR_DEAD_LETTER_REASON.to_string(), reason.to_string());
        let message = Message {
            id: queued.message.id.clone(),
            data: queued.message.data,
            attributes,
            publish_time: Utc::now(),
            delivery_attempt: 0,
        };

        warn!(subscription, message_id = %message.id, dead_letter_topic = %topic, reason, "dead-lettering message");
        if let Err(e) = self.fan_out(&topic, message, now) {
            warn!(subscription, error = %e, "failed to dead-letter message");
        }
    }

    /// Treats every delivery past its ack deadline as nacked.
    fn expire(&mut self, subscription: &str, now: Instant) {
        let Some(sub) = self.subscriptions.get_mut(subscription) else {
            return;
        };
        let expired: Vec<AckId> = sub
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let mut requeue = Vec::with_capacity(expired.len());
        for ack_id in expired {
            if let Some(flight) = sub.in_flight.remove(&ack_id) {
                debug!(subscription, %ack_id, "ack deadline expired");
                requeue.push(flight.queued);
            }
        }
        for queued in requeue {
            self.redeliver_or_dead_letter(subscription, queued, now);
        }
    }
}

/// A [`Publisher`] and [`Subscriber`] living entirely in process memory.
///
/// Topics and subscriptions must be created before use. Deliveries are
/// handed out FIFO per subscription; redelivered messages go to the back of
/// the queue, so ordering across messages is not preserved.
pub struct MemoryBus {
    state: Mutex<BusState>,
    notify: Notify,
    next_message_id: AtomicU64,
    next_ack_id: AtomicU64,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus {
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
            next_message_id: AtomicU64::new(1),
            next_ack_id: AtomicU64::new(1),
        }
    }

    pub async fn create_topic(&self, topic: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.topics.contains_key(topic) {
            return Err(BusError::TopicExists(topic.to_string()));
        }
        state.topics.insert(topic.to_string(), Vec::new());
        Ok(())
    }

    /// Attaches a new subscription to an existing topic. Only messages
    /// published afterwards are delivered to it.
    pub async fn create_subscription(&self, config: SubscriptionConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.subscriptions.contains_key(&config.name) {
            return Err(BusError::SubscriptionExists(config.name));
        }
        if let Some(dead_letter) = &config.dead_letter_topic
            && !state.topics.contains_key(dead_letter)
        {
            return Err(BusError::TopicNotFound(dead_letter.clone()));
        }
        let attached = state
            .topics
            .get_mut(&config.topic)
            .ok_or_else(|| BusError::TopicNotFound(config.topic.clone()))?;
        attached.push(config.name.clone());
        state.subscriptions.insert(
            config.name.clone(),
            SubscriptionState {
                config,
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
            },
        );
        Ok(())
    }

    fn next_ack_id(&self) -> AckId {
        AckId(self.next_ack_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn take_in_flight(&self, subscription: &str, ack_id: AckId) -> Result<(tokio::sync::MutexGuard<'_, BusState>, Queued)> {
        let mut state = self.state.lock().await;
        let flight = state
            .subscription_mut(subscription)?
            .in_flight
            .remove(&ack_id)
            .ok_or_else(|| BusError::UnknownAckId {
                subscription: subscription.to_string(),
                ack_id,
            })?;
        Ok((state, flight.queued))
    }
}

impl Publisher for MemoryBus {
    #[instrument(skip(self, _ctx, data), fields(bytes = data.len()))]
    async fn publish(&self, _ctx: &CancellationToken, topic: &str, data: Vec<u8>) -> Result<MessageId> {
        let id = MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed).to_string());
        let message = Message {
            id: id.clone(),
            data,
            attributes: BTreeMap::new(),
            publish_time: Utc::now(),
            delivery_attempt: 0,
        };
        self.state.lock().await.fan_out(topic, message, Instant::now())?;
        self.notify.notify_waiters();
        debug!(message_id = %id, "published");
        Ok(id)
    }
}

impl Subscriber for MemoryBus {
    async fn receive(&self, ctx: &CancellationToken, subscription: &str) -> Result<Option<Delivery>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.expire(subscription, now);

                let ack_id = self.next_ack_id();
                let sub = state.subscription_mut(subscription)?;
                if let Some(mut queued) = sub.ready.pop_front() {
                    queued.message.delivery_attempt += 1;
                    let message = queued.message.clone();
                    sub.in_flight.insert(
                        ack_id,
                        InFlight {
                            queued,
                            deadline: now + sub.config.ack_deadline,
                        },
                    );
                    return Ok(Some(Delivery { ack_id, message }));
                }
                sub.next_deadline().unwrap_or(now + IDLE_WAKE)
            };

            tokio::select! {
                _ = ctx.cancelled() => return Ok(None),
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, subscription: &str, ack_id: AckId) -> Result<()> {
        self.take_in_flight(subscription, ack_id).await?;
        Ok(())
    }

    async fn nack(&self, subscription: &str, ack_id: AckId) -> Result<()> {
        let (mut state, queued) = self.take_in_flight(subscription, ack_id).await?;
        state.redeliver_or_dead_letter(subscription, queued, Instant::now());
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&self, subscription: &str, ack_id: AckId, reason: &str) -> Result<()> {
        let (mut state, queued) = self.take_in_flight(subscription, ack_id).await?;
        state.dead_letter(subscription, queued, reason, Instant::now());
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

impl SubscriptionMonitor for MemoryBus {
    async fn subscription_stats(&self, subscription: &str) -> Result<SubscriptionStats> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.expire(subscription, now);
        Ok(state.subscription_mut(subscription)?.stats(now))
    }
}
