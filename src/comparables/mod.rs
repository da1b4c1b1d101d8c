//! Canonical feature state and change detection.
//!
//! Upstream feature records are volatile: fields come and go as the backend
//! evolves. Snapshots instead store [`ComparableFeature`]s, whose nested fields
//! are all [`OptionallySet`] so that a field an older snapshot never recorded
//! reads back as unknown rather than as empty. [`diff_features`] then compares
//! two snapshots field by field.

pub mod backend;
mod diff;
mod feature;
mod optional;

pub use backend::BackendFeature;
pub use diff::{
    DiffSummary, FeatureDiff, FeatureMap, FeatureModification, FeatureRef, FieldChange,
    diff_features,
};
pub use feature::{
    BaselineState, BaselineStatus, Browser, BrowserImplementationStatus, BrowserImplementations,
    BrowserState, ComparableFeature, DocLink, Docs,
};
pub use optional::OptionallySet;
