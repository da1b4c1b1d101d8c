//! Transient messages: the wire envelope and typed routing.
//!
//! Every message on the bus is an envelope
//!
//! ```json
//! {"apiVersion":"v1","kind":"RefreshSearchCommand","data":{...}}
//! ```
//!
//! Unlike durable payloads, events are never migrated. A consumer handles the
//! exact `(kind, apiVersion)` pairs it registered and rejects everything else
//! as unprocessable.

use serde::Serialize;
use serde::de::DeserializeOwned;

mod error;
pub mod messages;
mod router;

pub use error::{BoxError, HandlerError, HandlerErrorKind};
pub use messages::{
    BatchRefreshTrigger, EmailJobEvent, EmailJobMetadata, FeatureDiffEvent, RefreshSearchCommand,
};
pub use router::{Result, Router, RouterError, new_envelope};

/// A structure that can be routed over the bus.
pub trait Event: Serialize + DeserializeOwned + Send + 'static {
    /// Stable message type name, e.g. `"FeatureDiffEvent"`.
    const KIND: &'static str;

    /// Wire revision of the message type, e.g. `"v1"`.
    const API_VERSION: &'static str;
}
