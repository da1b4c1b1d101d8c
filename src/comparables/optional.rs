//! A value that is either explicitly present or was never recorded.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A field that distinguishes "absent" from "present with a zero value".
///
/// Snapshots written by an older schema simply lack newer fields. Reading them
/// back yields [`OptionallySet::Unset`], which the diff engine treats as
/// unknown rather than as a change to an empty value.
///
/// Use it with `#[serde(default, skip_serializing_if = "OptionallySet::is_unset")]`
/// so unset fields vanish from JSON while set zero values (`""`, `0`, `null`)
/// are always written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OptionallySet<T> {
    Unset,
    Set(T),
}

impl<T> Default for OptionallySet<T> {
    fn default() -> Self {
        OptionallySet::Unset
    }
}

impl<T> OptionallySet<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, OptionallySet::Set(_))
    }

    pub fn is_unset(&self) -> bool {
        !self.is_set()
    }

    /// The value, if set.
    pub fn get(&self) -> Option<&T> {
        match self {
            OptionallySet::Set(v) => Some(v),
            OptionallySet::Unset => None,
        }
    }
}

impl<T> From<T> for OptionallySet<T> {
    fn from(value: T) -> Self {
        OptionallySet::Set(value)
    }
}

impl<T: Serialize> Serialize for OptionallySet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OptionallySet::Set(v) => v.serialize(serializer),
            // Only reachable when the field attribute forgets `skip_serializing_if`.
            OptionallySet::Unset => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OptionallySet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Missing fields never reach here; `#[serde(default)]` makes them Unset.
        T::deserialize(deserializer).map(OptionallySet::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
        text: OptionallySet<String>,
        #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
        count: OptionallySet<u32>,
        #[serde(default, skip_serializing_if = "OptionallySet::is_unset")]
        maybe: OptionallySet<Option<String>>,
    }

    // ─── Unit tests ───

    #[test]
    fn unset_fields_are_omitted() {
        let probe = Probe {
            text: OptionallySet::Unset,
            count: OptionallySet::Unset,
            maybe: OptionallySet::Unset,
        };
        assert_eq!(serde_json::to_string(&probe).unwrap(), "{}");
        assert_eq!(serde_json::from_str::<Probe>("{}").unwrap(), probe);
    }

    #[test]
    fn set_zero_values_are_written() {
        let probe = Probe {
            text: OptionallySet::Set(String::new()),
            count: OptionallySet::Set(0),
            maybe: OptionallySet::Set(None),
        };
        let json = serde_json::to_string(&probe).unwrap();
        assert_eq!(json, r#"{"text":"","count":0,"maybe":null}"#);
        assert_eq!(serde_json::from_str::<Probe>(&json).unwrap(), probe);
    }

    #[test]
    fn explicit_null_is_set_none() {
        let probe: Probe = serde_json::from_str(r#"{"maybe":null}"#).unwrap();
        assert_eq!(probe.maybe, OptionallySet::Set(None));
        assert!(probe.text.is_unset());
    }

    #[test]
    fn accessors() {
        let set = OptionallySet::Set(3);
        assert_eq!(set.get(), Some(&3));
        assert_eq!(OptionallySet::<u8>::default().get(), None);
        assert_eq!(OptionallySet::from("x"), OptionallySet::Set("x"));
    }
}
