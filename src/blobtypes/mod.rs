//! Versioned durable payloads and the schema migration engine.
//!
//! Anything persisted to the blob store is a [`Payload`]: a serde type that
//! names its data family (`KIND`) and schema revision (`VERSION`). On disk it
//! is a JSON object with `kind` and `apiVersion` headers and the payload's own
//! fields flattened alongside them:
//!
//! ```json
//! {"kind":"FeatureListSnapshot","apiVersion":"v1","metadata":{...},"data":{...}}
//! ```
//!
//! Older revisions implement [`Migratable`], declaring the next revision in
//! their chain and how to convert into it. A [`Migrator`] holds the registered
//! edges and walks a stored blob forward until it matches the schema the
//! reader asked for.
//!
//! The field names `kind` and `apiVersion` are reserved: payload fields with
//! those names are overwritten by the headers.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

mod migrator;

pub use migrator::{
    HopError, MAX_MIGRATION_DEPTH, MigrationError, Migrator, Result, new_blob, peek_key,
};

/// Header carrying the payload kind.
pub const KIND_FIELD: &str = "kind";

/// Header carrying the payload schema version.
pub const VERSION_FIELD: &str = "apiVersion";

/// Error returned by a payload's own upgrade logic.
pub type UpgradeError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of one schema: a data family plus a revision within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaKey {
    pub kind: String,
    pub version: String,
}

impl SchemaKey {
    pub fn new(kind: impl Into<String>, version: impl Into<String>) -> Self {
        SchemaKey {
            kind: kind.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.version)
    }
}

/// A structure that can be stored at rest.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {
    /// Stable name of the data family, e.g. `"FeatureListSnapshot"`.
    const KIND: &'static str;

    /// Schema revision within the family, e.g. `"v1"`.
    const VERSION: &'static str;

    /// The schema key of this type.
    fn schema_key() -> SchemaKey {
        SchemaKey::new(Self::KIND, Self::VERSION)
    }
}

/// A payload revision that knows how to become the next revision.
pub trait Migratable: Payload {
    /// The revision this one upgrades into.
    type Next: Payload;

    fn upgrade(self) -> std::result::Result<Self::Next, UpgradeError>;
}
