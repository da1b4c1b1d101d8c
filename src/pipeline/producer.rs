//! Event producer: refreshes saved searches and announces what changed.
//!
//! # Refresh cycle
//!
//! 1. Read the previous snapshot for `(search, frequency)`. A missing blob is
//!    an empty baseline.
//! 2. Fetch the search's current features and normalize them.
//! 3. Diff against the baseline.
//! 4. Supersede the snapshot with a generation-guarded write: create-only
//!    when there was no snapshot, compare-and-swap otherwise.
//! 5. If anything changed, publish one [`FeatureDiffEvent`].
//!
//! Nothing is published until the write commits, so an attempt that loses the
//! compare-and-swap to another producer announces nothing. The whole cycle is
//! then retried against the winner's snapshot, up to [`MAX_ATTEMPTS`] times.
//! A crash between the write and the publish drops that notification: the
//! redelivered command diffs against the snapshot that was already written.
//!
//! When the query behind a saved search is edited, the stored snapshot no
//! longer describes the same result set. The producer detects this through the
//! query signature and silently rebuilds the baseline instead of announcing
//! every difference.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::blobstore::{BlobError, BlobStore, ExpectedGeneration, ReadOptions, WriteOptions};
use crate::blobtypes::{MigrationError, Migrator, new_blob};
use crate::bus::{BusError, Publisher};
use crate::comparables::{
    BackendFeature, ComparableFeature, DiffSummary, FeatureMap, diff_features,
};
use crate::event::{
    BatchRefreshTrigger, BoxError, FeatureDiffEvent, HandlerError, RefreshSearchCommand, Router,
    RouterError, new_envelope,
};
use crate::snapshot::{FeatureListSnapshot, query_signature, snapshot_path};
use crate::types::{EventId, JobFrequency, SearchId};

/// Read-diff-write attempts before giving up on a contended snapshot.
pub const MAX_ATTEMPTS: u32 = 3;

/// Fetches the live feature list behind a search query.
pub trait FeatureFetcher: Send + Sync + 'static {
    fn fetch_features(
        &self,
        ctx: &CancellationToken,
        query: &str,
    ) -> impl Future<Output = std::result::Result<Vec<BackendFeature>, BoxError>> + Send;
}

/// A saved search with at least one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSearch {
    pub search_id: SearchId,
    pub query: String,
}

/// Lists the saved searches that need refreshing at a frequency.
pub trait SearchCatalog: Send + Sync + 'static {
    fn searches_for_frequency(
        &self,
        ctx: &CancellationToken,
        frequency: JobFrequency,
    ) -> impl Future<Output = std::result::Result<Vec<SavedSearch>, BoxError>> + Send;
}

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("snapshot codec error: {0}")]
    Snapshot(#[from] MigrationError),

    #[error("failed to fetch features for search {search_id}: {source}")]
    Fetch {
        search_id: SearchId,
        #[source]
        source: BoxError,
    },

    #[error("failed to list saved searches: {0}")]
    Catalog(#[source] BoxError),

    #[error("failed to publish: {0}")]
    Publish(#[from] BusError),

    #[error("failed to encode event: {0}")]
    Encode(#[from] RouterError),

    #[error("failed to encode diff summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("snapshot {path} kept changing underneath us after {attempts} attempts")]
    Contended { path: String, attempts: u32 },
}

impl ProducerError {
    /// Whether a later redelivery could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            ProducerError::Blob(e) => matches!(e, BlobError::Io(_) | BlobError::PreconditionFailed { .. }),
            ProducerError::Fetch { .. }
            | ProducerError::Catalog(_)
            | ProducerError::Publish(_)
            | ProducerError::Contended { .. } => true,
            ProducerError::Snapshot(_) | ProducerError::Encode(_) | ProducerError::Summary(_) => {
                false
            }
        }
    }
}

impl From<ProducerError> for HandlerError {
    fn from(err: ProducerError) -> Self {
        if err.is_retriable() {
            HandlerError::transient("event producer", err)
        } else {
            HandlerError::permanent("event producer", err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ProducerError>;

/// What one refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Id of the published notification, if anything changed.
    pub published: Option<EventId>,
    /// Generation of the snapshot that was written.
    pub generation: u64,
    /// True when the stored baseline was discarded because the query changed.
    pub baseline_reset: bool,
}

struct Baseline {
    features: FeatureMap,
    expected: ExpectedGeneration,
    reset: bool,
}

pub struct EventProducer<B, F, P> {
    blobs: Arc<B>,
    fetcher: Arc<F>,
    publisher: Arc<P>,
    migrator: Migrator,
    notification_topic: String,
}

impl<B, F, P> EventProducer<B, F, P>
where
    B: BlobStore + 'static,
    F: FeatureFetcher,
    P: Publisher + 'static,
{
    pub fn new(
        blobs: Arc<B>,
        fetcher: Arc<F>,
        publisher: Arc<P>,
        migrator: Migrator,
        notification_topic: impl Into<String>,
    ) -> Self {
        EventProducer {
            blobs,
            fetcher,
            publisher,
            migrator,
            notification_topic: notification_topic.into(),
        }
    }

    /// Routes [`RefreshSearchCommand`]s to this producer.
    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let producer = self.clone();
        router.register::<RefreshSearchCommand, _, _>(move |ctx, event_id, cmd| {
            let producer = producer.clone();
            async move {
                producer
                    .handle_refresh(&ctx, &event_id, &cmd)
                    .await
                    .map(|_| ())
                    .map_err(HandlerError::from)
            }
        });
    }

    /// Runs the refresh cycle, retrying when a concurrent writer wins.
    #[instrument(skip(self, ctx, cmd), fields(search_id = %cmd.search_id, frequency = %cmd.frequency))]
    pub async fn handle_refresh(
        &self,
        ctx: &CancellationToken,
        event_id: &EventId,
        cmd: &RefreshSearchCommand,
    ) -> Result<RefreshOutcome> {
        let mut attempt = 1;
        loop {
            match self.refresh_once(ctx, event_id, cmd).await {
                Err(ProducerError::Blob(e)) if e.is_precondition_failed() => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(ProducerError::Contended {
                            path: snapshot_path(&cmd.search_id, cmd.frequency),
                            attempts: attempt,
                        });
                    }
                    warn!(attempt, error = %e, "snapshot changed concurrently, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn load_baseline(&self, path: &str, signature: &str) -> Result<Baseline> {
        let blob = match self.blobs.read_blob(path, ReadOptions::new()).await {
            Ok(blob) => Some(blob),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        let expected = ExpectedGeneration::for_read(blob.as_ref().map(|b| b.generation));

        let Some(blob) = blob else {
            debug!(path, "no previous snapshot");
            return Ok(Baseline {
                features: FeatureMap::new(),
                expected,
                reset: false,
            });
        };

        let snapshot: FeatureListSnapshot = self.migrator.decode(&blob.data)?;
        if snapshot.metadata.query_signature == signature {
            Ok(Baseline {
                features: snapshot.data.features,
                expected,
                reset: false,
            })
        } else {
            info!(path, "query changed since last snapshot, resetting baseline");
            Ok(Baseline {
                features: FeatureMap::new(),
                expected,
                reset: true,
            })
        }
    }

    async fn refresh_once(
        &self,
        ctx: &CancellationToken,
        event_id: &EventId,
        cmd: &RefreshSearchCommand,
    ) -> Result<RefreshOutcome> {
        let path = snapshot_path(&cmd.search_id, cmd.frequency);
        let signature = query_signature(&cmd.query);
        let baseline = self.load_baseline(&path, &signature).await?;

        let fetched = self
            .fetcher
            .fetch_features(ctx, &cmd.query)
            .await
            .map_err(|source| ProducerError::Fetch {
                search_id: cmd.search_id.clone(),
                source,
            })?;
        let current: FeatureMap = fetched
            .iter()
            .map(ComparableFeature::from_backend)
            .map(|f| (f.id.clone(), f))
            .collect();

        let diff = diff_features(&baseline.features, &current);
        let now = Utc::now();

        // Encoded up front so nothing can fail between the write and the publish
        // except the publish itself.
        let pending = if diff.is_empty() || baseline.reset {
            None
        } else {
            let event = FeatureDiffEvent {
                event_id: EventId::generate(),
                search_id: cmd.search_id.clone(),
                query: cmd.query.clone(),
                frequency: cmd.frequency,
                reasons: diff.reasons(),
                summary: DiffSummary::from_diff(diff).to_bytes()?,
                generated_at: now,
            };
            let envelope = new_envelope(&event)?;
            Some((event, envelope))
        };

        let snapshot = FeatureListSnapshot::new(
            cmd.search_id.clone(),
            &cmd.query,
            Some(event_id.clone()),
            current,
            now,
        );
        let generation = self
            .blobs
            .write_blob(
                &path,
                new_blob(&snapshot)?,
                WriteOptions::new()
                    .with_content_type("application/json")
                    .with_expected_generation(baseline.expected),
            )
            .await?;
        debug!(generation, "snapshot written");

        let published = match pending {
            Some((event, envelope)) => {
                self.publisher
                    .publish(ctx, &self.notification_topic, envelope)
                    .await?;
                info!(notification = %event.event_id, reasons = ?event.reasons, "published feature diff");
                Some(event.event_id)
            }
            None => None,
        };

        Ok(RefreshOutcome {
            published,
            generation,
            baseline_reset: baseline.reset,
        })
    }
}

/// Turns a [`BatchRefreshTrigger`] into one [`RefreshSearchCommand`] per
/// saved search at that frequency.
pub struct BatchFanOut<C, P> {
    catalog: Arc<C>,
    publisher: Arc<P>,
    ingestion_topic: String,
}

impl<C, P> BatchFanOut<C, P>
where
    C: SearchCatalog,
    P: Publisher + 'static,
{
    pub fn new(catalog: Arc<C>, publisher: Arc<P>, ingestion_topic: impl Into<String>) -> Self {
        BatchFanOut {
            catalog,
            publisher,
            ingestion_topic: ingestion_topic.into(),
        }
    }

    /// Routes [`BatchRefreshTrigger`]s to this fan-out.
    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let fan_out = self.clone();
        router.register::<BatchRefreshTrigger, _, _>(move |ctx, _event_id, trigger| {
            let fan_out = fan_out.clone();
            async move {
                fan_out
                    .handle_batch(&ctx, &trigger)
                    .await
                    .map(|_| ())
                    .map_err(HandlerError::from)
            }
        });
    }

    /// Publishes the per-search commands and returns how many were sent.
    ///
    /// A failure part-way through leaves earlier commands published; the
    /// redelivered trigger publishes them again, which the producer tolerates.
    #[instrument(skip(self, ctx, trigger), fields(frequency = %trigger.frequency))]
    pub async fn handle_batch(
        &self,
        ctx: &CancellationToken,
        trigger: &BatchRefreshTrigger,
    ) -> Result<usize> {
        let searches = self
            .catalog
            .searches_for_frequency(ctx, trigger.frequency)
            .await
            .map_err(ProducerError::Catalog)?;

        for search in &searches {
            let cmd = RefreshSearchCommand {
                search_id: search.search_id.clone(),
                query: search.query.clone(),
                frequency: trigger.frequency,
                issued_at: trigger.issued_at,
            };
            self.publisher
                .publish(ctx, &self.ingestion_topic, new_envelope(&cmd)?)
                .await?;
        }
        info!(count = searches.len(), "fanned out refresh commands");
        Ok(searches.len())
    }
}
