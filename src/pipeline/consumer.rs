//! Subscription consumer: bus deliveries in, routed handlers, settlement out.
//!
//! A feeder task pulls deliveries off one subscription into a bounded channel;
//! a [`Pool`] of workers drains it, runs each delivery through the [`Router`]
//! and settles it:
//!
//! | handler outcome                    | settlement |
//! |------------------------------------|------------|
//! | `Ok`                               | ack        |
//! | transient handler error            | nack       |
//! | unprocessable or permanent error   | reject     |

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bus::{BusError, Delivery, Subscriber};
use crate::event::{Router, RouterError};
use crate::types::EventId;
use crate::workerpool::{Pool, Worker};

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to receive from {subscription}: {source}")]
    Receive {
        subscription: String,
        #[source]
        source: BusError,
    },
}

pub type Result<T> = std::result::Result<T, ConsumerError>;

/// How a delivery is settled after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
    Reject,
}

impl Disposition {
    pub fn for_result(result: &std::result::Result<(), RouterError>) -> Self {
        match result {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_retriable() => Disposition::Nack,
            Err(_) => Disposition::Reject,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub subscription: String,
    pub num_workers: usize,
}

impl ConsumerConfig {
    pub fn new(subscription: impl Into<String>, num_workers: usize) -> Self {
        ConsumerConfig {
            subscription: subscription.into(),
            num_workers,
        }
    }
}

/// Routes and settles one delivery at a time.
struct DeliveryWorker<S> {
    subscriber: Arc<S>,
    router: Arc<Router>,
    subscription: String,
}

impl<S: Subscriber + 'static> Worker<Delivery> for DeliveryWorker<S> {
    type Error = BusError;

    async fn work(
        &self,
        ctx: &CancellationToken,
        worker_id: usize,
        delivery: Delivery,
    ) -> std::result::Result<(), BusError> {
        let event_id = EventId::new(delivery.message.id.as_str());
        let result = self
            .router
            .handle_message(ctx, &event_id, &delivery.message.data)
            .await;

        match Disposition::for_result(&result) {
            Disposition::Ack => {
                debug!(worker_id, %event_id, "acking");
                self.subscriber.ack(&self.subscription, delivery.ack_id).await
            }
            Disposition::Nack => {
                if let Err(e) = &result {
                    warn!(
                        worker_id,
                        %event_id,
                        attempt = delivery.message.delivery_attempt,
                        error = %e,
                        "transient failure, nacking"
                    );
                }
                self.subscriber.nack(&self.subscription, delivery.ack_id).await
            }
            Disposition::Reject => {
                let reason = result.err().map(|e| e.to_string()).unwrap_or_default();
                warn!(worker_id, %event_id, reason = %reason, "rejecting to dead-letter");
                self.subscriber
                    .reject(&self.subscription, delivery.ack_id, &reason)
                    .await
            }
        }
    }
}

/// Consumes one subscription until cancelled.
pub struct Consumer<S> {
    subscriber: Arc<S>,
    router: Arc<Router>,
    config: ConsumerConfig,
}

impl<S: Subscriber + 'static> Consumer<S> {
    pub fn new(subscriber: Arc<S>, router: Arc<Router>, config: ConsumerConfig) -> Self {
        Consumer {
            subscriber,
            router,
            config,
        }
    }

    /// Runs until `ctx` is cancelled or the subscription fails.
    ///
    /// Deliveries still buffered when the consumer stops are left unsettled;
    /// the bus redelivers them after their ack deadline.
    #[instrument(skip_all, fields(subscription = %self.config.subscription))]
    pub async fn run(&self, ctx: &CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.config.num_workers.max(1));
        let worker = Arc::new(DeliveryWorker {
            subscriber: self.subscriber.clone(),
            router: self.router.clone(),
            subscription: self.config.subscription.clone(),
        });

        info!(num_workers = self.config.num_workers, "consumer starting");
        let feeder = async move {
            loop {
                let delivery = match self.subscriber.receive(ctx, &self.config.subscription).await {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => return Ok(()),
                    Err(source) => {
                        return Err(ConsumerError::Receive {
                            subscription: self.config.subscription.clone(),
                            source,
                        });
                    }
                };
                if tx.send(delivery).await.is_err() {
                    return Ok(());
                }
            }
        };
        let pool = Pool::start(ctx, rx, self.config.num_workers, worker);

        let (fed, settle_errors) = tokio::join!(feeder, pool);
        for e in &settle_errors {
            warn!(error = %e, "failed to settle delivery");
        }
        info!("consumer stopped");
        fed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HandlerError;

    #[test]
    fn disposition_follows_classification() {
        assert_eq!(Disposition::for_result(&Ok(())), Disposition::Ack);

        let transient = Err(RouterError::Handler(HandlerError::transient_without_source("x")));
        assert_eq!(Disposition::for_result(&transient), Disposition::Nack);

        let permanent = Err(RouterError::Handler(HandlerError::permanent_without_source("x")));
        assert_eq!(Disposition::for_result(&permanent), Disposition::Reject);

        let unprocessable = Err(RouterError::NoHandler {
            kind: "X".into(),
            api_version: "v1".into(),
        });
        assert_eq!(Disposition::for_result(&unprocessable), Disposition::Reject);
    }
}
