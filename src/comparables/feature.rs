//! The canonical feature state stored in snapshots.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::OptionallySet;
use super::backend::{BackendBaseline, BackendBrowserImplementation, BackendDocs, BackendFeature};
use crate::types::FeatureId;

use OptionallySet::{Set, Unset};

/// Baseline tier of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    Limited,
    Newly,
    Widely,
}

/// Whether a browser ships a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserImplementationStatus {
    Unavailable,
    Available,
}

/// The fixed set of browsers tracked per feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    Chrome,
    ChromeAndroid,
    Edge,
    Firefox,
    FirefoxAndroid,
    Safari,
    SafariIos,
}

impl Browser {
    pub const ALL: [Browser; 7] = [
        Browser::Chrome,
        Browser::ChromeAndroid,
        Browser::Edge,
        Browser::Firefox,
        Browser::FirefoxAndroid,
        Browser::Safari,
        Browser::SafariIos,
    ];

    /// Key used by the upstream backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::ChromeAndroid => "chrome_android",
            Browser::Edge => "edge",
            Browser::Firefox => "firefox",
            Browser::FirefoxAndroid => "firefox_android",
            Browser::Safari => "safari",
            Browser::SafariIos => "safari_ios",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One feature as it matters for change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparableFeature {
    pub id: FeatureId,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub name: OptionallySet<String>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub baseline_status: OptionallySet<BaselineState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub browser_implementations: OptionallySet<BrowserImplementations>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub docs: OptionallySet<Docs>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineState {
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub status: OptionallySet<BaselineStatus>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub low_date: OptionallySet<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub high_date: OptionallySet<Option<NaiveDate>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserImplementations {
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub chrome: OptionallySet<BrowserState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub chrome_android: OptionallySet<BrowserState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub edge: OptionallySet<BrowserState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub firefox: OptionallySet<BrowserState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub firefox_android: OptionallySet<BrowserState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub safari: OptionallySet<BrowserState>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub safari_ios: OptionallySet<BrowserState>,
}

impl BrowserImplementations {
    pub fn get(&self, browser: Browser) -> &OptionallySet<BrowserState> {
        match browser {
            Browser::Chrome => &self.chrome,
            Browser::ChromeAndroid => &self.chrome_android,
            Browser::Edge => &self.edge,
            Browser::Firefox => &self.firefox,
            Browser::FirefoxAndroid => &self.firefox_android,
            Browser::Safari => &self.safari,
            Browser::SafariIos => &self.safari_ios,
        }
    }

    pub fn get_mut(&mut self, browser: Browser) -> &mut OptionallySet<BrowserState> {
        match browser {
            Browser::Chrome => &mut self.chrome,
            Browser::ChromeAndroid => &mut self.chrome_android,
            Browser::Edge => &mut self.edge,
            Browser::Firefox => &mut self.firefox,
            Browser::FirefoxAndroid => &mut self.firefox_android,
            Browser::Safari => &mut self.safari,
            Browser::SafariIos => &mut self.safari_ios,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserState {
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub status: OptionallySet<BrowserImplementationStatus>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub date: OptionallySet<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub version: OptionallySet<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Docs {
    #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
    pub mdn_docs: OptionallySet<Vec<DocLink>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocLink {
    pub url: String,
}

impl ComparableFeature {
    /// A feature with nothing but its id recorded.
    pub fn new(id: impl Into<FeatureId>) -> Self {
        ComparableFeature {
            id: id.into(),
            name: Unset,
            baseline_status: Unset,
            browser_implementations: Unset,
            docs: Unset,
        }
    }

    /// Normalizes an upstream record.
    ///
    /// A feature always has a baseline tier, so a missing upstream baseline
    /// becomes `Limited`. Browsers are different: one the backend does not
    /// mention (or mentions with every field empty) stays unset.
    pub fn from_backend(feature: &BackendFeature) -> Self {
        ComparableFeature {
            id: FeatureId::new(feature.feature_id.clone()),
            name: Set(feature.name.clone()),
            baseline_status: Set(BaselineState::from_backend(feature.baseline.as_ref())),
            browser_implementations: Set(BrowserImplementations::from_backend(
                feature.browser_implementations.as_ref(),
            )),
            docs: Set(Docs::from_backend(feature.docs.as_ref())),
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.get().map_or(self.id.as_str(), String::as_str)
    }
}

impl BaselineState {
    fn from_backend(baseline: Option<&BackendBaseline>) -> Self {
        match baseline {
            None => BaselineState {
                status: Set(BaselineStatus::Limited),
                low_date: Set(None),
                high_date: Set(None),
            },
            Some(b) => BaselineState {
                status: Set(b.status.unwrap_or(BaselineStatus::Limited)),
                low_date: Set(b.low_date),
                high_date: Set(b.high_date),
            },
        }
    }
}

impl BrowserImplementations {
    fn from_backend(
        upstream: Option<&std::collections::HashMap<String, BackendBrowserImplementation>>,
    ) -> Self {
        let mut out = BrowserImplementations::default();
        let Some(upstream) = upstream else {
            return out;
        };
        for browser in Browser::ALL {
            if let Some(record) = upstream.get(browser.as_str())
                && !record.is_empty()
            {
                *out.get_mut(browser) = Set(BrowserState {
                    status: Set(record.status.unwrap_or(BrowserImplementationStatus::Unavailable)),
                    date: Set(record.date),
                    version: Set(record.version.clone()),
                });
            }
        }
        out
    }
}

impl Docs {
    fn from_backend(docs: Option<&BackendDocs>) -> Self {
        let links = docs
            .and_then(|d| d.mdn_docs.as_ref())
            .map(|mdn| {
                mdn.iter()
                    .filter_map(|doc| doc.url.clone())
                    .map(|url| DocLink { url })
                    .collect()
            })
            .unwrap_or_default();
        Docs { mdn_docs: Set(links) }
    }
}
