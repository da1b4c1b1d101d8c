//! Change detection between two feature maps.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{
    BaselineState, BaselineStatus, Browser, BrowserImplementationStatus, BrowserImplementations,
    BrowserState, ComparableFeature, DocLink, OptionallySet,
};
use crate::types::{FeatureId, JobTrigger};

/// Features keyed by id, in the order snapshots store them.
pub type FeatureMap = BTreeMap<FeatureId, ComparableFeature>;

/// One field that moved between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldChange {
    Name {
        from: String,
        to: String,
    },
    BaselineStatus {
        from: BaselineStatus,
        to: BaselineStatus,
    },
    BaselineLowDate {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    BaselineHighDate {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    BrowserStatus {
        browser: Browser,
        from: BrowserImplementationStatus,
        to: BrowserImplementationStatus,
    },
    BrowserDate {
        browser: Browser,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    BrowserVersion {
        browser: Browser,
        from: Option<String>,
        to: Option<String>,
    },
    Docs {
        from: Vec<DocLink>,
        to: Vec<DocLink>,
    },
}

/// A feature that entered or left the result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRef {
    pub id: FeatureId,
    pub name: String,
}

impl From<&ComparableFeature> for FeatureRef {
    fn from(feature: &ComparableFeature) -> Self {
        FeatureRef {
            id: feature.id.clone(),
            name: feature.display_name().to_string(),
        }
    }
}

/// A feature present on both sides whose recorded state differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureModification {
    pub id: FeatureId,
    pub name: String,
    pub changes: Vec<FieldChange>,
}

/// Everything that changed between an old and a new feature map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDiff {
    pub added: Vec<FeatureRef>,
    pub removed: Vec<FeatureRef>,
    pub modified: Vec<FeatureModification>,
}

impl FeatureDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// The notification triggers this diff satisfies, sorted and deduplicated.
    pub fn reasons(&self) -> Vec<JobTrigger> {
        let mut reasons = BTreeSet::new();
        if !self.added.is_empty() {
            reasons.insert(JobTrigger::FeatureAdded);
        }
        if !self.removed.is_empty() {
            reasons.insert(JobTrigger::FeatureRemoved);
        }
        for change in self.modified.iter().flat_map(|m| &m.changes) {
            match change {
                FieldChange::BaselineStatus { to: BaselineStatus::Newly, .. } => {
                    reasons.insert(JobTrigger::FeatureBaselineToNewly);
                }
                FieldChange::BaselineStatus { to: BaselineStatus::Widely, .. } => {
                    reasons.insert(JobTrigger::FeatureBaselineToWidely);
                }
                FieldChange::BaselineStatus { to: BaselineStatus::Limited, .. } => {
                    reasons.insert(JobTrigger::FeatureBaselineRegressionToLimited);
                }
                FieldChange::BrowserStatus {
                    to: BrowserImplementationStatus::Available,
                    ..
                } => {
                    reasons.insert(JobTrigger::FeatureBrowserImplementationAnyComplete);
                }
                _ => {}
            }
        }
        reasons.into_iter().collect()
    }
}

/// Compares two feature maps by id.
///
/// A field is only compared when both sides recorded it. An unset field on
/// either side is unknown, so filling in a field that an older snapshot never
/// had is not a change.
pub fn diff_features(old: &FeatureMap, new: &FeatureMap) -> FeatureDiff {
    let mut diff = FeatureDiff::default();

    for (id, feature) in new {
        match old.get(id) {
            None => diff.added.push(FeatureRef::from(feature)),
            Some(previous) => {
                let changes = diff_feature(previous, feature);
                if !changes.is_empty() {
                    diff.modified.push(FeatureModification {
                        id: id.clone(),
                        name: feature.display_name().to_string(),
                        changes,
                    });
                }
            }
        }
    }
    diff.removed = old
        .iter()
        .filter(|(id, _)| !new.contains_key(*id))
        .map(|(_, feature)| FeatureRef::from(feature))
        .collect();

    diff
}

fn both_set<'a, T: PartialEq>(
    old: &'a OptionallySet<T>,
    new: &'a OptionallySet<T>,
) -> Option<(&'a T, &'a T)> {
    match (old, new) {
        (OptionallySet::Set(a), OptionallySet::Set(b)) if a != b => Some((a, b)),
        _ => None,
    }
}

fn diff_feature(old: &ComparableFeature, new: &ComparableFeature) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if let Some((from, to)) = both_set(&old.name, &new.name) {
        changes.push(FieldChange::Name {
            from: from.clone(),
            to: to.clone(),
        });
    }
    if let Some((from, to)) = both_set(&old.baseline_status, &new.baseline_status) {
        diff_baseline(from, to, &mut changes);
    }
    if let Some((from, to)) = both_set(&old.browser_implementations, &new.browser_implementations)
    {
        diff_browsers(from, to, &mut changes);
    }
    if let Some((from, to)) = both_set(&old.docs, &new.docs)
        && let Some((from, to)) = both_set(&from.mdn_docs, &to.mdn_docs)
    {
        changes.push(FieldChange::Docs {
            from: from.clone(),
            to: to.clone(),
        });
    }

    changes
}

fn diff_baseline(old: &BaselineState, new: &BaselineState, changes: &mut Vec<FieldChange>) {
    if let Some((from, to)) = both_set(&old.status, &new.status) {
        changes.push(FieldChange::BaselineStatus { from: *from, to: *to });
    }
    if let Some((from, to)) = both_set(&old.low_date, &new.low_date) {
        changes.push(FieldChange::BaselineLowDate { from: *from, to: *to });
    }
    if let Some((from, to)) = both_set(&old.high_date, &new.high_date) {
        changes.push(FieldChange::BaselineHighDate { from: *from, to: *to });
    }
}

fn diff_browsers(
    old: &BrowserImplementations,
    new: &BrowserImplementations,
    changes: &mut Vec<FieldChange>,
) {
    for browser in Browser::ALL {
        if let Some((from, to)) = both_set(old.get(browser), new.get(browser)) {
            diff_browser(browser, from, to, changes);
        }
    }
}

fn diff_browser(
    browser: Browser,
    old: &BrowserState,
    new: &BrowserState,
    changes: &mut Vec<FieldChange>,
) {
    if let Some((from, to)) = both_set(&old.status, &new.status) {
        changes.push(FieldChange::BrowserStatus {
            browser,
            from: *from,
            to: *to,
        });
    }
    if let Some((from, to)) = both_set(&old.date, &new.date) {
        changes.push(FieldChange::BrowserDate {
            browser,
            from: *from,
            to: *to,
        });
    }
    if let Some((from, to)) = both_set(&old.version, &new.version) {
        changes.push(FieldChange::BrowserVersion {
            browser,
            from: from.clone(),
            to: to.clone(),
        });
    }
}

/// The serialized body carried by a notification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// One-line human summary, e.g. `"1 added, 0 removed, 2 updated"`.
    pub text: String,
    pub diff: FeatureDiff,
}

impl DiffSummary {
    pub fn from_diff(diff: FeatureDiff) -> Self {
        let text = format!(
            "{} added, {} removed, {} updated",
            diff.added.len(),
            diff.removed.len(),
            diff.modified.len()
        );
        DiffSummary { text, diff }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::test_utils::arb_feature_map;

    use OptionallySet::{Set, Unset};

    fn feature(id: &str, status: BaselineStatus) -> ComparableFeature {
        ComparableFeature {
            name: Set(id.to_uppercase()),
            baseline_status: Set(BaselineState {
                status: Set(status),
                low_date: Set(None),
                high_date: Set(None),
            }),
            browser_implementations: Set(BrowserImplementations::default()),
            ..ComparableFeature::new(id)
        }
    }

    fn map(features: impl IntoIterator<Item = ComparableFeature>) -> FeatureMap {
        features.into_iter().map(|f| (f.id.clone(), f)).collect()
    }

    // ─── Property tests ───

    proptest! {
        #[test]
        fn map_against_itself_is_empty(features in arb_feature_map()) {
            let diff = diff_features(&features, &features);
            prop_assert!(diff.is_empty());
            prop_assert!(diff.reasons().is_empty());
        }

        #[test]
        fn everything_is_added_against_an_empty_baseline(features in arb_feature_map()) {
            let diff = diff_features(&FeatureMap::new(), &features);
            prop_assert_eq!(diff.added.len(), features.len());
            prop_assert!(diff.removed.is_empty());
            prop_assert!(diff.modified.is_empty());
        }
    }

    // ─── Unit tests ───

    #[test]
    fn added_and_removed() {
        let old = map([feature("a", BaselineStatus::Limited), feature("b", BaselineStatus::Limited)]);
        let new = map([feature("b", BaselineStatus::Limited), feature("c", BaselineStatus::Limited)]);

        let diff = diff_features(&old, &new);
        assert_eq!(diff.added, vec![FeatureRef { id: "c".into(), name: "C".into() }]);
        assert_eq!(diff.removed, vec![FeatureRef { id: "a".into(), name: "A".into() }]);
        assert!(diff.modified.is_empty());
        assert_eq!(diff.reasons(), vec![JobTrigger::FeatureAdded, JobTrigger::FeatureRemoved]);
    }

    #[test]
    fn baseline_transitions_map_to_triggers() {
        let cases = [
            (BaselineStatus::Limited, BaselineStatus::Newly, JobTrigger::FeatureBaselineToNewly),
            (BaselineStatus::Newly, BaselineStatus::Widely, JobTrigger::FeatureBaselineToWidely),
            (
                BaselineStatus::Widely,
                BaselineStatus::Limited,
                JobTrigger::FeatureBaselineRegressionToLimited,
            ),
        ];
        for (from, to, trigger) in cases {
            let diff = diff_features(&map([feature("a", from)]), &map([feature("a", to)]));
            assert_eq!(diff.modified.len(), 1);
            assert_eq!(diff.modified[0].changes, vec![FieldChange::BaselineStatus { from, to }]);
            assert_eq!(diff.reasons(), vec![trigger]);
        }
    }

    #[test]
    fn browser_shipping_is_any_complete() {
        let unavailable = BrowserState {
            status: Set(BrowserImplementationStatus::Unavailable),
            date: Set(None),
            version: Set(None),
        };
        let mut old = feature("a", BaselineStatus::Limited);
        let mut new = old.clone();
        if let Set(browsers) = &mut old.browser_implementations {
            browsers.safari = Set(unavailable.clone());
        }
        if let Set(browsers) = &mut new.browser_implementations {
            browsers.safari = Set(BrowserState {
                status: Set(BrowserImplementationStatus::Available),
                version: Set(Some("18".into())),
                ..unavailable
            });
        }

        let diff = diff_features(&map([old]), &map([new]));
        assert_eq!(
            diff.modified[0].changes,
            vec![
                FieldChange::BrowserStatus {
                    browser: Browser::Safari,
                    from: BrowserImplementationStatus::Unavailable,
                    to: BrowserImplementationStatus::Available,
                },
                FieldChange::BrowserVersion {
                    browser: Browser::Safari,
                    from: None,
                    to: Some("18".into()),
                },
            ]
        );
        assert_eq!(diff.reasons(), vec![JobTrigger::FeatureBrowserImplementationAnyComplete]);
    }

    #[test]
    fn unset_on_either_side_is_not_a_change() {
        let full = feature("a", BaselineStatus::Widely);
        let legacy = ComparableFeature {
            baseline_status: Unset,
            docs: Unset,
            ..full.clone()
        };

        assert!(diff_features(&map([legacy.clone()]), &map([full.clone()])).is_empty());
        assert!(diff_features(&map([full]), &map([legacy])).is_empty());
    }

    #[test]
    fn browser_appearing_is_not_a_change() {
        let old = feature("a", BaselineStatus::Limited);
        let mut new = old.clone();
        if let Set(browsers) = &mut new.browser_implementations {
            browsers.chrome = Set(BrowserState {
                status: Set(BrowserImplementationStatus::Available),
                ..Default::default()
            });
        }
        assert!(diff_features(&map([old]), &map([new])).is_empty());
    }

    #[test]
    fn summary_round_trips_through_bytes() {
        let diff = diff_features(&FeatureMap::new(), &map([feature("a", BaselineStatus::Newly)]));
        let summary = DiffSummary::from_diff(diff);
        assert_eq!(summary.text, "1 added, 0 removed, 0 updated");
        let back = DiffSummary::from_bytes(&summary.to_bytes().unwrap()).unwrap();
        assert_eq!(back, summary);
    }
}
