//! Core domain types shared by every pipeline stage.

pub mod frequency;
pub mod ids;
pub mod trigger;

pub use frequency::JobFrequency;
pub use ids::{ChannelId, EventId, FeatureId, SearchId, SubscriptionId};
pub use trigger::JobTrigger;
