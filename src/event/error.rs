//! Handler failure classification.
//!
//! Handlers tell the consumer how to dispose of a message by the kind of error
//! they return:
//!
//! - **Transient** failures are nacked and redelivered by the bus (network
//!   blips, a contended blob write that exhausted its retries, a downstream
//!   publish failure).
//! - **Permanent** failures are rejected straight to the dead-letter topic;
//!   redelivering the same bytes can never succeed.

use std::fmt;

use thiserror::Error;

/// Boxed error carried as the cause of a handler failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Whether a handler failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerErrorKind {
    /// Safe to redeliver.
    Transient,
    /// Redelivery cannot help.
    Permanent,
}

impl HandlerErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, HandlerErrorKind::Transient)
    }
}

/// A failure reported by an event handler.
#[derive(Debug, Error)]
pub struct HandlerError {
    pub kind: HandlerErrorKind,

    /// A human-readable description of what the handler was doing.
    pub message: String,

    #[source]
    pub source: Option<BoxError>,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            HandlerErrorKind::Transient => "transient",
            HandlerErrorKind::Permanent => "permanent",
        };
        match &self.source {
            Some(source) => write!(f, "{} handler failure: {}: {}", kind, self.message, source),
            None => write!(f, "{} handler failure: {}", kind, self.message),
        }
    }
}

impl HandlerError {
    /// A retriable failure caused by `source`.
    pub fn transient(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            kind: HandlerErrorKind::Transient,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// A non-retriable failure caused by `source`.
    pub fn permanent(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            kind: HandlerErrorKind::Permanent,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: HandlerErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: HandlerErrorKind::Permanent,
            message: message.into(),
            source: None,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}
