//! Shared test utilities and arbitrary generators for property-based testing.

use chrono::NaiveDate;
use proptest::prelude::*;

use crate::comparables::{
    BaselineState, BaselineStatus, Browser, BrowserImplementationStatus, BrowserImplementations,
    BrowserState, ComparableFeature, DocLink, Docs, FeatureMap, OptionallySet,
};
use crate::types::{FeatureId, JobFrequency, SearchId};

pub fn arb_optionally<T: std::fmt::Debug + Clone>(
    inner: impl Strategy<Value = T>,
) -> impl Strategy<Value = OptionallySet<T>> {
    prop_oneof![Just(OptionallySet::Unset), inner.prop_map(OptionallySet::Set)]
}

pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2015i32..2030, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

pub fn arb_feature_id() -> impl Strategy<Value = FeatureId> {
    "[a-z][a-z0-9-]{0,20}".prop_map(FeatureId::new)
}

pub fn arb_search_id() -> impl Strategy<Value = SearchId> {
    "[a-zA-Z0-9_-]{1,30}".prop_map(SearchId::new)
}

pub fn arb_frequency() -> impl Strategy<Value = JobFrequency> {
    prop_oneof![
        Just(JobFrequency::Unknown),
        Just(JobFrequency::Immediate),
        Just(JobFrequency::Weekly),
        Just(JobFrequency::Monthly),
    ]
}

pub fn arb_baseline_status() -> impl Strategy<Value = BaselineStatus> {
    prop_oneof![
        Just(BaselineStatus::Limited),
        Just(BaselineStatus::Newly),
        Just(BaselineStatus::Widely),
    ]
}

pub fn arb_baseline_state() -> impl Strategy<Value = BaselineState> {
    (
        arb_optionally(arb_baseline_status()),
        arb_optionally(proptest::option::of(arb_date())),
        arb_optionally(proptest::option::of(arb_date())),
    )
        .prop_map(|(status, low_date, high_date)| BaselineState {
            status,
            low_date,
            high_date,
        })
}

pub fn arb_browser_state() -> impl Strategy<Value = BrowserState> {
    (
        arb_optionally(prop_oneof![
            Just(BrowserImplementationStatus::Unavailable),
            Just(BrowserImplementationStatus::Available),
        ]),
        arb_optionally(proptest::option::of(arb_date())),
        arb_optionally(proptest::option::of("[0-9]{1,3}")),
    )
        .prop_map(|(status, date, version)| BrowserState {
            status,
            date,
            version,
        })
}

pub fn arb_browser_implementations() -> impl Strategy<Value = BrowserImplementations> {
    prop::collection::vec(arb_optionally(arb_browser_state()), Browser::ALL.len()).prop_map(
        |states| {
            let mut out = BrowserImplementations::default();
            for (browser, state) in Browser::ALL.into_iter().zip(states) {
                *out.get_mut(browser) = state;
            }
            out
        },
    )
}

pub fn arb_docs() -> impl Strategy<Value = Docs> {
    arb_optionally(prop::collection::vec(
        "https://developer\\.mozilla\\.org/[a-z]{1,10}".prop_map(|url| DocLink { url }),
        0..3,
    ))
    .prop_map(|mdn_docs| Docs { mdn_docs })
}

pub fn arb_comparable_feature() -> impl Strategy<Value = ComparableFeature> {
    (
        arb_feature_id(),
        arb_optionally("[A-Za-z ]{0,20}"),
        arb_optionally(arb_baseline_state()),
        arb_optionally(arb_browser_implementations()),
        arb_optionally(arb_docs()),
    )
        .prop_map(
            |(id, name, baseline_status, browser_implementations, docs)| ComparableFeature {
                id,
                name,
                baseline_status,
                browser_implementations,
                docs,
            },
        )
}

pub fn arb_feature_map() -> impl Strategy<Value = FeatureMap> {
    prop::collection::vec(arb_comparable_feature(), 0..8)
        .prop_map(|features| features.into_iter().map(|f| (f.id.clone(), f)).collect())
}
