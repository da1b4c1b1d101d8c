//! How often a subscriber wants to hear about a saved search.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Delivery cadence for a subscription, and the cadence a refresh job runs at.
///
/// Each frequency keeps its own snapshot per search: a weekly digest diffs
/// against last week's state, not against the last immediate refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobFrequency {
    #[default]
    Unknown,
    Immediate,
    Weekly,
    Monthly,
}

impl JobFrequency {
    /// Lowercase name used in blob paths and config values.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobFrequency::Unknown => "unknown",
            JobFrequency::Immediate => "immediate",
            JobFrequency::Weekly => "weekly",
            JobFrequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for JobFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(JobFrequency::Unknown),
            "immediate" => Ok(JobFrequency::Immediate),
            "weekly" => Ok(JobFrequency::Weekly),
            "monthly" => Ok(JobFrequency::Monthly),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}
