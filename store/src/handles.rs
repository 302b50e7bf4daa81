//! Client-side field handlers.
//!
//! Handle fields defer their population to code registered on the client.
//! The normalizer records a [`HandleFieldPayload`] for each one it passes;
//! during publish the queue looks the handler up by name and invokes it
//! against the same overlay user updaters write into.

use crate::{error::Result, normalize::HandleFieldPayload, proxy::RecordSourceProxy};
use std::collections::HashMap;

/// A registered handler for a named handle.
pub trait Handler {
    /// Derive the value at `payload.handle_key` from the server data at
    /// `payload.field_key`, writing through the proxy.
    fn update(&self, store: &RecordSourceProxy<'_>, payload: &HandleFieldPayload) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&RecordSourceProxy<'_>, &HandleFieldPayload) -> Result<()>,
{
    fn update(&self, store: &RecordSourceProxy<'_>, payload: &HandleFieldPayload) -> Result<()> {
        self(store, payload)
    }
}

/// Handlers keyed by handle name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one under the same name.
    pub fn register(&mut self, handle: impl Into<String>, handler: impl Handler + 'static) {
        self.handlers.insert(handle.into(), Box::new(handler));
    }

    pub fn get(&self, handle: &str) -> Option<&dyn Handler> {
        self.handlers.get(handle).map(Box::as_ref)
    }
}
