//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! `SubscriptionId` where a `SearchId` is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generates a string-backed identifier newtype with the usual conversions.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

string_id!(
    /// A saved search identifier.
    SearchId
);

string_id!(
    /// A user's subscription to a saved search.
    SubscriptionId
);

string_id!(
    /// A notification channel (e.g. one verified email address) owned by a user.
    ChannelId
);

string_id!(
    /// A stable web-features identifier such as `"grid"` or `"container-queries"`.
    FeatureId
);

/// Identifier of a single event flowing through the pipeline.
///
/// Generated as a random UUID by the stage that creates the event, and carried
/// forward so downstream stages (and the persisted snapshot) can refer back to
/// the event that triggered them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(s: impl Into<String>) -> Self {
        EventId(s.into())
    }

    /// Creates a fresh random event ID.
    pub fn generate() -> Self {
        EventId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        EventId(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        EventId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn search_id_serde_roundtrip(s in "[a-zA-Z0-9_-]{1,40}") {
            let id = SearchId::new(s.clone());
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(&json, &format!("\"{}\"", s));
            let parsed: SearchId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(parsed, id);
        }
    }

    #[test]
    fn display_is_the_raw_string() {
        assert_eq!(FeatureId::new("grid").to_string(), "grid");
        assert_eq!(SubscriptionId::from("sub-1").to_string(), "sub-1");
        assert_eq!(ChannelId::from("chan".to_string()).as_str(), "chan");
    }

    #[test]
    fn generated_event_ids_are_unique() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
