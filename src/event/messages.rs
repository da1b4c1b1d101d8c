//! The concrete messages exchanged between pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Event;
use crate::types::{ChannelId, EventId, JobFrequency, JobTrigger, SearchId, SubscriptionId};

/// Carries opaque bytes as a standard base64 string.
mod base64_bytes {
    use base64::{Engine, prelude::BASE64_STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

/// Asks the event producer to refresh one saved search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSearchCommand {
    pub search_id: SearchId,
    pub query: String,
    pub frequency: JobFrequency,
    pub issued_at: DateTime<Utc>,
}

impl Event for RefreshSearchCommand {
    const KIND: &'static str = "RefreshSearchCommand";
    const API_VERSION: &'static str = "v1";
}

/// Asks the event producer to refresh every saved search with a subscription
/// at `frequency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRefreshTrigger {
    pub frequency: JobFrequency,
    pub issued_at: DateTime<Utc>,
}

impl Event for BatchRefreshTrigger {
    const KIND: &'static str = "BatchRefreshTrigger";
    const API_VERSION: &'static str = "v1";
}

/// Announces that the results of a saved search changed.
///
/// `summary` is the serialized diff summary. Downstream stages pass it along
/// untouched; only the renderer looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDiffEvent {
    pub event_id: EventId,
    pub search_id: SearchId,
    pub query: String,
    pub frequency: JobFrequency,
    #[serde(with = "base64_bytes")]
    pub summary: Vec<u8>,
    #[serde(default)]
    pub reasons: Vec<JobTrigger>,
    pub generated_at: DateTime<Utc>,
}

impl Event for FeatureDiffEvent {
    const KIND: &'static str = "FeatureDiffEvent";
    const API_VERSION: &'static str = "v1";
}

/// Context copied from the originating [`FeatureDiffEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJobMetadata {
    pub event_id: EventId,
    pub search_id: SearchId,
    pub query: String,
    pub frequency: JobFrequency,
    pub generated_at: DateTime<Utc>,
}

/// One email to send to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJobEvent {
    pub subscription_id: SubscriptionId,
    pub recipient_email: String,
    #[serde(with = "base64_bytes")]
    pub summary_raw: Vec<u8>,
    pub metadata: EmailJobMetadata,
    pub channel_id: ChannelId,
}

impl Event for EmailJobEvent {
    const KIND: &'static str = "EmailJobEvent";
    const API_VERSION: &'static str = "v1";
}
