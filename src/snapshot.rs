//! Persisted feature-list snapshots.
//!
//! The event producer keeps one snapshot per saved search and frequency. Each
//! diff cycle compares the live feature list against the snapshot and then
//! supersedes it with a generation-guarded write.
//!
//! # Blob layout
//!
//! ```json
//! {
//!   "kind": "FeatureListSnapshot",
//!   "apiVersion": "v1",
//!   "metadata": {"id": "...", "generatedAt": "...", "searchId": "...",
//!                "querySignature": "...", "eventId": "..."},
//!   "data": {"features": {"grid": {...}}}
//! }
//! ```
//!
//! stored at `searches/<search_id>/<frequency>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::blobtypes::{Migrator, Payload};
use crate::comparables::FeatureMap;
use crate::types::{EventId, JobFrequency, SearchId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Random id of this snapshot.
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub search_id: SearchId,
    /// Hash of the query the features were fetched with.
    pub query_signature: String,
    /// Bus message id of the command that triggered this cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub features: FeatureMap,
}

/// Version 1 of the persisted feature list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureListSnapshotV1 {
    pub metadata: SnapshotMetadata,
    pub data: SnapshotData,
}

impl Payload for FeatureListSnapshotV1 {
    const KIND: &'static str = "FeatureListSnapshot";
    const VERSION: &'static str = "v1";
}

impl FeatureListSnapshotV1 {
    pub fn new(
        search_id: SearchId,
        query: &str,
        event_id: Option<EventId>,
        features: FeatureMap,
        generated_at: DateTime<Utc>,
    ) -> Self {
        FeatureListSnapshotV1 {
            metadata: SnapshotMetadata {
                id: uuid::Uuid::new_v4().to_string(),
                generated_at,
                search_id,
                query_signature: query_signature(query),
                event_id,
            },
            data: SnapshotData { features },
        }
    }
}

/// The latest snapshot revision. Readers decode into this.
pub type FeatureListSnapshot = FeatureListSnapshotV1;

/// Migrator holding every upgrade step for snapshot blobs.
///
/// Only v1 exists so far; new revisions register their predecessor here.
pub fn snapshot_migrator() -> Migrator {
    Migrator::new()
}

/// Blob path of the snapshot for one search at one frequency.
pub fn snapshot_path(search_id: &SearchId, frequency: JobFrequency) -> String {
    format!("searches/{}/{}.json", search_id, frequency.as_str())
}

/// Stable fingerprint of a search query.
///
/// Whitespace runs are collapsed first, so reformatting a query does not
/// invalidate its baseline.
pub fn query_signature(query: &str) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::blobtypes::{SchemaKey, new_blob, peek_key};
    use crate::comparables::ComparableFeature;
    use crate::blobstore::validate_path;
    use crate::test_utils::{arb_feature_map, arb_frequency, arb_search_id};

    fn sample(features: FeatureMap) -> FeatureListSnapshotV1 {
        FeatureListSnapshotV1::new(
            SearchId::new("s-1"),
            "baseline_status:widely",
            Some(EventId::new("e-1")),
            features,
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    // ─── Property tests ───

    proptest! {
        #[test]
        fn blob_round_trip(features in arb_feature_map(), search_id in arb_search_id()) {
            let mut snapshot = sample(features);
            snapshot.metadata.search_id = search_id;
            let blob = new_blob(&snapshot).unwrap();
            let back: FeatureListSnapshot = snapshot_migrator().decode(&blob).unwrap();
            prop_assert_eq!(back, snapshot);
        }

        #[test]
        fn paths_are_valid_and_distinct(
            a in (arb_search_id(), arb_frequency()),
            b in (arb_search_id(), arb_frequency()),
        ) {
            let path_a = snapshot_path(&a.0, a.1);
            prop_assert!(validate_path(&path_a).is_ok());
            prop_assert_eq!(path_a == snapshot_path(&b.0, b.1), a == b);
        }
    }

    // ─── Unit tests ───

    #[test]
    fn blob_layout() {
        let mut features = FeatureMap::new();
        features.insert("grid".into(), ComparableFeature::new("grid"));
        let snapshot = sample(features);

        let blob = new_blob(&snapshot).unwrap();
        assert_eq!(peek_key(&blob).unwrap(), SchemaKey::new("FeatureListSnapshot", "v1"));

        let value: serde_json::Value = serde_json::from_slice(&blob).unwrap();
        assert_eq!(value["metadata"]["searchId"], "s-1");
        assert_eq!(value["metadata"]["eventId"], "e-1");
        assert_eq!(value["metadata"]["generatedAt"], "2025-03-01T12:00:00Z");
        assert_eq!(value["data"]["features"]["grid"], serde_json::json!({"id": "grid"}));
    }

    #[test]
    fn event_id_is_optional() {
        let mut snapshot = sample(FeatureMap::new());
        snapshot.metadata.event_id = None;
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["metadata"].get("eventId").is_none());
    }

    #[test]
    fn signature_ignores_whitespace_layout() {
        let a = query_signature("baseline_status:newly  AND name:grid");
        let b = query_signature(" baseline_status:newly AND\tname:grid ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, query_signature("baseline_status:widely"));
    }

    #[test]
    fn path_layout() {
        assert_eq!(
            snapshot_path(&SearchId::new("abc"), JobFrequency::Weekly),
            "searches/abc/weekly.json"
        );
    }
}
