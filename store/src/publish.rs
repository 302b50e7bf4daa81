//! Publish queue - staging and linearization of incoming sources.
//!
//! Three kinds of input stage here between notify ticks: normalized server
//! payloads, committed (non-revertible) updaters, and revertible optimistic
//! updates. [`PublishQueue::run`] is the single linearization point: staged
//! server work merges into one overlay that becomes the new base, then the
//! live optimistic updates are re-run in their original order over the new
//! base to rebuild the store's optimistic overlay. Reverting an optimistic
//! update never rolls back records; the overlay is simply rebuilt without
//! it on the next run.

use crate::{
    ast::OperationDescriptor,
    error::Result,
    handles::HandlerRegistry,
    normalize::{normalize, HandleFieldPayload},
    proxy::{RecordSourceProxy, SelectorProxy},
    source::Entry,
    store::Store,
    Error, RecordSource,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;

/// An error reported inside an otherwise well-formed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadError {
    pub message: String,
}

/// A normalized server response ready to publish.
#[derive(Clone)]
pub struct ResponsePayload {
    pub source: RecordSource,
    pub field_payloads: Vec<HandleFieldPayload>,
    pub errors: Vec<PayloadError>,
}

/// A committed updater: runs once against the server overlay.
pub type StoreUpdater = Box<dyn FnOnce(&RecordSourceProxy<'_>) -> Result<()>>;

/// A revertible local update, re-applied over every new base until reverted.
pub enum OptimisticUpdate {
    /// A free-form store updater.
    Store {
        updater: Rc<dyn Fn(&RecordSourceProxy<'_>) -> Result<()>>,
    },
    /// An optimistic server response for an operation, optionally refined
    /// by a selector-bound updater.
    Selector {
        operation: OperationDescriptor,
        response: Option<Value>,
        #[allow(clippy::type_complexity)]
        updater: Option<Rc<dyn Fn(&SelectorProxy<'_, '_>, &Value) -> Result<()>>>,
    },
}

impl OptimisticUpdate {
    pub fn store(updater: impl Fn(&RecordSourceProxy<'_>) -> Result<()> + 'static) -> Self {
        Self::Store {
            updater: Rc::new(updater),
        }
    }

    pub fn selector(operation: OperationDescriptor, response: Value) -> Self {
        Self::Selector {
            operation,
            response: Some(response),
            updater: None,
        }
    }

    pub fn selector_with_updater(
        operation: OperationDescriptor,
        response: Option<Value>,
        updater: impl Fn(&SelectorProxy<'_, '_>, &Value) -> Result<()> + 'static,
    ) -> Self {
        Self::Selector {
            operation,
            response,
            updater: Some(Rc::new(updater)),
        }
    }
}

/// Handle for a live optimistic update; consumed by
/// [`PublishQueue::revert_update`].
#[derive(Debug)]
pub struct UpdateToken(u64);

/// Staged inputs waiting for the next run.
#[derive(Default)]
pub struct PublishQueue {
    pending_payloads: Vec<ResponsePayload>,
    pending_updaters: Vec<StoreUpdater>,
    optimistic: Vec<(u64, OptimisticUpdate)>,
    next_token: u64,
    handlers: HandlerRegistry,
    /// An optimistic update was applied or reverted since the last run.
    optimistic_dirty: bool,
}

impl PublishQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler registry consulted for staged field payloads.
    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    /// Normalize a server response for `operation` into a staged payload.
    pub fn commit_payload(
        &mut self,
        fragments: &crate::ast::FragmentCatalog,
        operation: &OperationDescriptor,
        response: &Value,
    ) -> Result<()> {
        let mut source = RecordSource::new();
        let field_payloads = normalize(&mut source, fragments, &operation.root, response)?;
        self.pending_payloads.push(ResponsePayload {
            source,
            field_payloads,
            errors: Vec::new(),
        });
        Ok(())
    }

    /// Stage an already-normalized payload.
    pub fn commit_response(&mut self, payload: ResponsePayload) {
        self.pending_payloads.push(payload);
    }

    /// Stage a committed updater.
    pub fn commit_update(
        &mut self,
        updater: impl FnOnce(&RecordSourceProxy<'_>) -> Result<()> + 'static,
    ) {
        self.pending_updaters.push(Box::new(updater));
    }

    /// Stage a revertible optimistic update.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> UpdateToken {
        self.next_token += 1;
        let token = self.next_token;
        self.optimistic.push((token, update));
        self.optimistic_dirty = true;
        UpdateToken(token)
    }

    /// Revoke an optimistic update. Its effects disappear on the next run.
    pub fn revert_update(&mut self, token: UpdateToken) {
        let before = self.optimistic.len();
        self.optimistic.retain(|(id, _)| *id != token.0);
        if self.optimistic.len() != before {
            self.optimistic_dirty = true;
        }
    }

    /// Apply everything staged: server payloads in FIFO order and committed
    /// updaters merge into the base; live optimistic updates are then
    /// re-applied in enqueue order to rebuild the optimistic overlay.
    /// Change notifications go out on the store's next `notify`.
    pub fn run(&mut self, store: &mut Store) -> Result<()> {
        let has_server_work =
            !self.pending_payloads.is_empty() || !self.pending_updaters.is_empty();

        if has_server_work {
            tracing::debug!(
                payloads = self.pending_payloads.len(),
                updaters = self.pending_updaters.len(),
                "applying staged server work"
            );
            let proxy = RecordSourceProxy::new(store.source());
            for payload in self.pending_payloads.drain(..) {
                proxy.with_sink_mut(|sink| merge_source(sink, payload.source));
                for field_payload in &payload.field_payloads {
                    let handler = self
                        .handlers
                        .get(&field_payload.handle)
                        .ok_or_else(|| Error::HandlerNotFound(field_payload.handle.clone()))?;
                    handler.update(&proxy, field_payload)?;
                }
            }
            for updater in self.pending_updaters.drain(..) {
                updater(&proxy)?;
            }
            let sink = proxy.into_sink();
            store.publish(sink);
        }

        let rebase_needed = has_server_work && !self.optimistic.is_empty();
        if self.optimistic_dirty || rebase_needed {
            if self.optimistic.is_empty() {
                store.replace_optimistic(None);
            } else {
                let proxy = RecordSourceProxy::new(store.source());
                for (_, update) in &self.optimistic {
                    match update {
                        OptimisticUpdate::Store { updater } => updater(&proxy)?,
                        OptimisticUpdate::Selector {
                            operation,
                            response,
                            updater,
                        } => {
                            if let Some(response) = response {
                                let field_payloads = proxy.with_sink_mut(|sink| {
                                    normalize(sink, store.fragments(), &operation.root, response)
                                })?;
                                for field_payload in &field_payloads {
                                    let handler =
                                        self.handlers.get(&field_payload.handle).ok_or_else(
                                            || Error::HandlerNotFound(field_payload.handle.clone()),
                                        )?;
                                    handler.update(&proxy, field_payload)?;
                                }
                            }
                            if let Some(updater) = updater {
                                let data = response.clone().unwrap_or(Value::Null);
                                updater(&SelectorProxy::new(&proxy, operation), &data)?;
                            }
                        }
                    }
                }
                let overlay = proxy.into_sink();
                store.replace_optimistic(Some(overlay));
            }
            self.optimistic_dirty = false;
        }

        Ok(())
    }
}

/// Field-wise merge of one overlay source into another.
fn merge_source(sink: &mut RecordSource, source: RecordSource) {
    for (id, entry) in source.into_entries() {
        match entry {
            Entry::Tombstone => sink.delete(id),
            Entry::Record(next) => match sink.get_mut(&id) {
                Some(prev) => prev.update_from(&next),
                None => sink.set(next),
            },
        }
    }
}
