//! Reasons a subscriber may want to be notified.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A category of change that a subscription can opt into.
///
/// The event producer attaches every trigger a diff satisfies to the
/// notification event; push delivery matches them against each subscription's
/// configured triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    /// A feature started matching the saved search.
    FeatureAdded,
    /// A feature stopped matching the saved search.
    FeatureRemoved,
    /// A feature's baseline status became "newly available".
    FeatureBaselineToNewly,
    /// A feature's baseline status became "widely available".
    FeatureBaselineToWidely,
    /// A feature's baseline status regressed to "limited".
    FeatureBaselineRegressionToLimited,
    /// At least one browser shipped the feature.
    FeatureBrowserImplementationAnyComplete,
}

impl fmt::Display for JobTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobTrigger::FeatureAdded => "feature_added",
            JobTrigger::FeatureRemoved => "feature_removed",
            JobTrigger::FeatureBaselineToNewly => "feature_baseline_to_newly",
            JobTrigger::FeatureBaselineToWidely => "feature_baseline_to_widely",
            JobTrigger::FeatureBaselineRegressionToLimited => "feature_baseline_regression_to_limited",
            JobTrigger::FeatureBrowserImplementationAnyComplete => {
                "feature_browser_implementation_any_complete"
            }
        };
        f.write_str(name)
    }
}
