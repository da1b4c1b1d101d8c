//! Envelope codec and the `(kind, apiVersion)` dispatch table.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{Event, HandlerError};
use crate::types::EventId;

/// Errors from encoding or routing an event.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unprocessable entity: invalid event envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error(
        "unprocessable entity: payload for {kind}/{api_version} does not decode as {type_name}: {source}"
    )]
    SchemaValidation {
        kind: String,
        api_version: String,
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unprocessable entity: no handler registered for kind {kind:?} version {api_version:?}")]
    NoHandler { kind: String, api_version: String },

    #[error("a handler is already registered for {kind}/{api_version}")]
    DuplicateRoute {
        kind: &'static str,
        api_version: &'static str,
    },

    #[error("failed to encode event envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl RouterError {
    /// True when the message itself is bad, so redelivery can never help.
    pub fn is_unprocessable(&self) -> bool {
        matches!(
            self,
            RouterError::InvalidEnvelope(_)
                | RouterError::SchemaValidation { .. }
                | RouterError::NoHandler { .. }
        )
    }

    /// True when the bus should redeliver the message.
    pub fn is_retriable(&self) -> bool {
        match self {
            RouterError::Handler(err) => err.is_retriable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Serialize)]
struct OutgoingEnvelope<'a, T> {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    data: &'a T,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    data: Box<RawValue>,
}

/// Wraps `payload` in an envelope carrying its kind and version.
pub fn new_envelope<T: Event>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&OutgoingEnvelope {
        api_version: T::API_VERSION,
        kind: T::KIND,
        data: payload,
    })
    .map_err(RouterError::Encode)
}

type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send>>;

/// Decodes the raw payload and, on success, starts the handler.
type Dispatch = Box<
    dyn Fn(CancellationToken, EventId, &RawValue) -> serde_json::Result<HandlerFuture> + Send + Sync,
>;

struct Route {
    kind: &'static str,
    api_version: &'static str,
    type_name: &'static str,
    dispatch: Dispatch,
}

/// Dispatches enveloped messages to typed async handlers.
///
/// Routes are matched on exact `(kind, apiVersion)`. The router is built once
/// at startup and then shared immutably across workers.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `T`'s kind and version.
    ///
    /// # Panics
    ///
    /// Panics if a handler for the same pair is already registered. Routing
    /// tables are wired at startup, so a duplicate is a programming error.
    pub fn register<T, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        T: Event,
        F: Fn(CancellationToken, EventId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        if let Err(e) = self.try_register::<T, F, Fut>(handler) {
            panic!("{e}");
        }
        self
    }

    /// Like [`Router::register`], but reports a duplicate instead of panicking.
    pub fn try_register<T, F, Fut>(&mut self, handler: F) -> Result<&mut Self>
    where
        T: Event,
        F: Fn(CancellationToken, EventId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        if self
            .routes
            .iter()
            .any(|r| r.kind == T::KIND && r.api_version == T::API_VERSION)
        {
            return Err(RouterError::DuplicateRoute {
                kind: T::KIND,
                api_version: T::API_VERSION,
            });
        }

        let dispatch: Dispatch = Box::new(move |ctx: CancellationToken, event_id: EventId, raw: &RawValue| {
            let payload: T = serde_json::from_str(raw.get())?;
            Ok(Box::pin(handler(ctx, event_id, payload)) as HandlerFuture)
        });
        self.routes.push(Route {
            kind: T::KIND,
            api_version: T::API_VERSION,
            type_name: std::any::type_name::<T>(),
            dispatch,
        });
        Ok(self)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Decodes one message and runs the matching handler to completion.
    ///
    /// The payload is only decoded once a route is found. Handler failures are
    /// returned as [`RouterError::Handler`] with their classification intact.
    #[instrument(skip(self, ctx, data), fields(event_id = %event_id))]
    pub async fn handle_message(
        &self,
        ctx: &CancellationToken,
        event_id: &EventId,
        data: &[u8],
    ) -> Result<()> {
        let envelope: IncomingEnvelope =
            serde_json::from_slice(data).map_err(RouterError::InvalidEnvelope)?;

        let Some(route) = self
            .routes
            .iter()
            .find(|r| r.kind == envelope.kind && r.api_version == envelope.api_version)
        else {
            return Err(RouterError::NoHandler {
                kind: envelope.kind,
                api_version: envelope.api_version,
            });
        };

        let run = (route.dispatch)(ctx.clone(), event_id.clone(), &envelope.data).map_err(
            |source| RouterError::SchemaValidation {
                kind: envelope.kind.clone(),
                api_version: envelope.api_version.clone(),
                type_name: route.type_name,
                source,
            },
        )?;

        debug!(kind = %route.kind, api_version = %route.api_version, "dispatching event");
        run.await?;
        Ok(())
    }
}
