//! webstatus-notify - Saved-search notifications for web platform features.
//!
//! This library provides the notification pipeline: versioned snapshot
//! storage, feature diffing, typed event routing over a message bus, and the
//! stages that turn a changed search result into an email.

pub mod blobstore;
pub mod blobtypes;
pub mod bus;
pub mod comparables;
pub mod config;
pub mod event;
pub mod pipeline;
pub mod snapshot;
pub mod types;
pub mod workerpool;

#[cfg(test)]
mod test_utils;
