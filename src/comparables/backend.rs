//! Upstream feature records as returned by the feature search backend.
//!
//! These mirror the backend's JSON shapes and are allowed to change with it.
//! Nothing here is persisted; [`ComparableFeature::from_backend`] is the only
//! consumer.
//!
//! [`ComparableFeature::from_backend`]: super::ComparableFeature::from_backend

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{BaselineStatus, BrowserImplementationStatus};

/// One feature in a search result page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFeature {
    pub feature_id: String,
    pub name: String,
    #[serde(default)]
    pub baseline: Option<BackendBaseline>,
    /// Keyed by browser name (`"chrome"`, `"safari_ios"`, ...).
    #[serde(default)]
    pub browser_implementations: Option<HashMap<String, BackendBrowserImplementation>>,
    #[serde(default)]
    pub developer_signals: Option<BackendDeveloperSignals>,
    #[serde(default)]
    pub docs: Option<BackendDocs>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendBaseline {
    #[serde(default)]
    pub status: Option<BaselineStatus>,
    #[serde(default)]
    pub low_date: Option<NaiveDate>,
    #[serde(default)]
    pub high_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendBrowserImplementation {
    #[serde(default)]
    pub status: Option<BrowserImplementationStatus>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub version: Option<String>,
}

impl BackendBrowserImplementation {
    /// True when the backend sent the record but filled in nothing.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.date.is_none() && self.version.is_none()
    }
}

/// Developer upvotes. Not part of the comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDeveloperSignals {
    #[serde(default)]
    pub upvotes: Option<i64>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDocs {
    #[serde(default)]
    pub mdn_docs: Option<Vec<BackendMdnDoc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendMdnDoc {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}
