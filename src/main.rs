use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webstatus_notify::blobstore::FsBlobStore;
use webstatus_notify::bus::topology::{
    BATCH_UPDATES_TOPIC, EMAIL_TOPIC, INGESTION_JOBS_TOPIC, NOTIFICATION_EVENTS_TOPIC,
};
use webstatus_notify::bus::{HealthThresholds, MemoryBus, Publisher, Topology, check_health};
use webstatus_notify::comparables::BackendFeature;
use webstatus_notify::config::Config;
use webstatus_notify::event::{BatchRefreshTrigger, BoxError, Router, new_envelope};
use webstatus_notify::pipeline::{
    BatchFanOut, Consumer, ConsumerConfig, EmailWorker, EventProducer, FeatureFetcher,
    InMemorySubscriptionFinder, LogEmailSender, PushDelivery, SavedSearch, SearchCatalog,
    SubscriberTarget,
};
use webstatus_notify::snapshot::snapshot_migrator;
use webstatus_notify::types::{ChannelId, JobFrequency, JobTrigger, SearchId, SubscriptionId};

/// Serves the same feature list, read from a JSON file, to every query.
struct FileFeatureFetcher {
    path: Option<PathBuf>,
}

impl FeatureFetcher for FileFeatureFetcher {
    async fn fetch_features(
        &self,
        _ctx: &CancellationToken,
        _query: &str,
    ) -> Result<Vec<BackendFeature>, BoxError> {
        match &self.path {
            Some(path) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    search_id: SearchId,
    query: String,
    #[serde(default)]
    subscribers: Vec<SubscriberEntry>,
}

#[derive(Debug, Deserialize)]
struct SubscriberEntry {
    subscription_id: SubscriptionId,
    channel_id: ChannelId,
    email: String,
    frequency: JobFrequency,
    #[serde(default)]
    triggers: Vec<JobTrigger>,
}

/// Saved searches loaded once at startup.
struct FileCatalog {
    searches: Vec<SearchEntry>,
}

impl FileCatalog {
    fn load(path: Option<&Path>) -> Result<Self, BoxError> {
        let searches = match path {
            Some(path) => serde_json::from_slice(&std::fs::read(path)?)?,
            None => Vec::new(),
        };
        Ok(FileCatalog { searches })
    }

    async fn seed(&self, finder: &InMemorySubscriptionFinder) {
        for search in &self.searches {
            for sub in &search.subscribers {
                let target = SubscriberTarget {
                    subscription_id: sub.subscription_id.clone(),
                    channel_id: sub.channel_id.clone(),
                    recipient_email: sub.email.clone(),
                    triggers: sub.triggers.clone(),
                };
                finder.add(search.search_id.clone(), sub.frequency, target).await;
            }
        }
    }
}

impl SearchCatalog for FileCatalog {
    async fn searches_for_frequency(
        &self,
        _ctx: &CancellationToken,
        frequency: JobFrequency,
    ) -> Result<Vec<SavedSearch>, BoxError> {
        Ok(self
            .searches
            .iter()
            .filter(|s| s.subscribers.iter().any(|sub| sub.frequency == frequency))
            .map(|s| SavedSearch {
                search_id: s.search_id.clone(),
                query: s.query.clone(),
            })
            .collect())
    }
}

async fn publish_refresh(
    bus: &MemoryBus,
    ctx: &CancellationToken,
    frequency: JobFrequency,
) -> Result<(), BoxError> {
    let trigger = BatchRefreshTrigger {
        frequency,
        issued_at: Utc::now(),
    };
    bus.publish(ctx, BATCH_UPDATES_TOPIC, new_envelope(&trigger)?).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webstatus_notify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(?config, "starting local pipeline");

    let bus = Arc::new(MemoryBus::new());
    let topology = Topology::default().with_ack_deadline(config.ack_deadline);
    topology.provision(&bus).await?;

    let blobs = Arc::new(FsBlobStore::new(&config.data_dir));
    let fetcher = Arc::new(FileFeatureFetcher {
        path: config.features_file.clone(),
    });
    let catalog = Arc::new(FileCatalog::load(config.searches_file.as_deref())?);
    let finder = Arc::new(InMemorySubscriptionFinder::new());
    catalog.seed(&finder).await;

    // One router per stage, so a message on the wrong topic has no handler
    // and is dead-lettered.
    let mut ingestion = Router::new();
    Arc::new(EventProducer::new(
        blobs,
        fetcher,
        bus.clone(),
        snapshot_migrator(),
        NOTIFICATION_EVENTS_TOPIC,
    ))
    .register(&mut ingestion);
    let mut batch = Router::new();
    Arc::new(BatchFanOut::new(catalog, bus.clone(), INGESTION_JOBS_TOPIC)).register(&mut batch);
    let mut notifications = Router::new();
    Arc::new(PushDelivery::new(finder, bus.clone(), EMAIL_TOPIC)).register(&mut notifications);
    let mut email = Router::new();
    Arc::new(EmailWorker::new(Arc::new(LogEmailSender))).register(&mut email);

    let ctx = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for (topic, router) in [
        (INGESTION_JOBS_TOPIC, ingestion),
        (BATCH_UPDATES_TOPIC, batch),
        (NOTIFICATION_EVENTS_TOPIC, notifications),
        (EMAIL_TOPIC, email),
    ] {
        let consumer = Consumer::new(
            bus.clone(),
            Arc::new(router),
            ConsumerConfig::new(topology.subscription_for(topic), config.num_workers),
        );
        let ctx = ctx.clone();
        tasks.spawn(async move {
            if let Err(e) = consumer.run(&ctx).await {
                error!(error = %e, "consumer failed");
            }
        });
    }

    // Immediate refreshes start right away; digests wait one full period.
    for (frequency, period) in config.refresh_schedule() {
        let bus = bus.clone();
        let ctx = ctx.clone();
        let start = match frequency {
            JobFrequency::Immediate => Instant::now(),
            _ => Instant::now() + period,
        };
        let mut ticks = tokio::time::interval_at(start, period);
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    _ = ticks.tick() => {
                        if let Err(e) = publish_refresh(&bus, &ctx, frequency).await {
                            warn!(%frequency, error = %e, "failed to publish refresh trigger");
                        }
                    }
                }
            }
        });
    }

    {
        let bus = bus.clone();
        let ctx = ctx.clone();
        let thresholds = HealthThresholds {
            max_unacked_age: config.max_unacked_age,
        };
        let mut health = tokio::time::interval(config.health_interval);
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return,
                    _ = health.tick() => {
                        if let Err(e) = check_health(bus.as_ref(), &topology, &thresholds).await {
                            warn!(error = %e, "health check failed");
                        }
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    ctx.cancel();
    while tasks.join_next().await.is_some() {}
    Ok(())
}
