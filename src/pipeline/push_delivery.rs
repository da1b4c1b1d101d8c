//! Push delivery: fans a feature diff out to interested subscribers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::bus::{BusError, Publisher};
use crate::event::{
    BoxError, EmailJobEvent, EmailJobMetadata, FeatureDiffEvent, HandlerError, Router,
    RouterError, new_envelope,
};
use crate::types::{ChannelId, JobFrequency, JobTrigger, SearchId, SubscriptionId};

/// One subscription to a saved search, resolved to a delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberTarget {
    pub subscription_id: SubscriptionId,
    pub channel_id: ChannelId,
    pub recipient_email: String,
    /// Triggers the subscriber opted into. Empty means every change.
    pub triggers: Vec<JobTrigger>,
}

impl SubscriberTarget {
    /// Whether a notification with `reasons` is wanted.
    pub fn wants(&self, reasons: &[JobTrigger]) -> bool {
        self.triggers.is_empty() || self.triggers.iter().any(|t| reasons.contains(t))
    }
}

/// Resolves the subscribers of a saved search at one frequency.
pub trait SubscriptionFinder: Send + Sync + 'static {
    fn find_subscribers(
        &self,
        ctx: &CancellationToken,
        search_id: &SearchId,
        frequency: JobFrequency,
    ) -> impl Future<Output = std::result::Result<Vec<SubscriberTarget>, BoxError>> + Send;
}

/// A [`SubscriptionFinder`] backed by a map, for local runs and tests.
#[derive(Default)]
pub struct InMemorySubscriptionFinder {
    subscribers: RwLock<HashMap<(SearchId, JobFrequency), Vec<SubscriberTarget>>>,
}

impl InMemorySubscriptionFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, search_id: SearchId, frequency: JobFrequency, target: SubscriberTarget) {
        self.subscribers
            .write()
            .await
            .entry((search_id, frequency))
            .or_default()
            .push(target);
    }
}

impl SubscriptionFinder for InMemorySubscriptionFinder {
    async fn find_subscribers(
        &self,
        _ctx: &CancellationToken,
        search_id: &SearchId,
        frequency: JobFrequency,
    ) -> std::result::Result<Vec<SubscriberTarget>, BoxError> {
        Ok(self
            .subscribers
            .read()
            .await
            .get(&(search_id.clone(), frequency))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Error)]
pub enum PushDeliveryError {
    #[error("failed to resolve subscribers for search {search_id}: {source}")]
    Subscribers {
        search_id: SearchId,
        #[source]
        source: BoxError,
    },

    #[error("failed to encode email job: {0}")]
    Encode(#[from] RouterError),

    #[error("failed to publish email job: {0}")]
    Publish(#[from] BusError),
}

impl From<PushDeliveryError> for HandlerError {
    fn from(err: PushDeliveryError) -> Self {
        if matches!(err, PushDeliveryError::Encode(_)) {
            HandlerError::permanent("push delivery", err)
        } else {
            HandlerError::transient("push delivery", err)
        }
    }
}

pub type Result<T> = std::result::Result<T, PushDeliveryError>;

pub struct PushDelivery<S, P> {
    finder: Arc<S>,
    publisher: Arc<P>,
    email_topic: String,
}

impl<S, P> PushDelivery<S, P>
where
    S: SubscriptionFinder,
    P: Publisher + 'static,
{
    pub fn new(finder: Arc<S>, publisher: Arc<P>, email_topic: impl Into<String>) -> Self {
        PushDelivery {
            finder,
            publisher,
            email_topic: email_topic.into(),
        }
    }

    /// Routes [`FeatureDiffEvent`]s to this stage.
    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let stage = self.clone();
        router.register::<FeatureDiffEvent, _, _>(move |ctx, _event_id, event| {
            let stage = stage.clone();
            async move {
                stage
                    .handle_diff(&ctx, &event)
                    .await
                    .map(|_| ())
                    .map_err(HandlerError::from)
            }
        });
    }

    /// Publishes one email job per subscriber that wants this diff and
    /// returns how many were published.
    #[instrument(skip(self, ctx, event), fields(event_id = %event.event_id, search_id = %event.search_id))]
    pub async fn handle_diff(&self, ctx: &CancellationToken, event: &FeatureDiffEvent) -> Result<usize> {
        let subscribers = self
            .finder
            .find_subscribers(ctx, &event.search_id, event.frequency)
            .await
            .map_err(|source| PushDeliveryError::Subscribers {
                search_id: event.search_id.clone(),
                source,
            })?;

        let mut published = 0;
        for target in subscribers {
            if !target.wants(&event.reasons) {
                debug!(subscription_id = %target.subscription_id, "subscriber not interested");
                continue;
            }
            let job = EmailJobEvent {
                subscription_id: target.subscription_id,
                recipient_email: target.recipient_email,
                summary_raw: event.summary.clone(),
                metadata: EmailJobMetadata {
                    event_id: event.event_id.clone(),
                    search_id: event.search_id.clone(),
                    query: event.query.clone(),
                    frequency: event.frequency,
                    generated_at: event.generated_at,
                },
                channel_id: target.channel_id,
            };
            self.publisher
                .publish(ctx, &self.email_topic, new_envelope(&job)?)
                .await?;
            published += 1;
        }
        info!(published, "queued email jobs");
        Ok(published)
    }
}
