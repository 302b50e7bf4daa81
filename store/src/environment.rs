//! Environment - one store, one publish queue, one network handle.
//!
//! Environments are instance-scoped; there is no process-wide singleton,
//! and several may coexist. Every convenience operation here stages its
//! input on the queue, runs it, and notifies, so callers observe each call
//! as one atomic store transition.

use crate::{
    ast::{FragmentCatalog, OperationDescriptor, Selector},
    check::MissingFieldHandler,
    error::Result,
    handles::Handler,
    normalize::normalize,
    observable::{Event, Observable, Observer},
    proxy::{RecordSourceProxy, SelectorProxy},
    publish::{OptimisticUpdate, PayloadError, PublishQueue, ResponsePayload, UpdateToken},
    read::Snapshot,
    store::{RetainToken, Store, SubscriptionToken},
    Error, RecordSource,
};
use serde_json::Value;
use std::rc::Rc;

/// A raw response from the network.
#[derive(Debug, Clone)]
pub struct GraphQLResponse {
    pub data: Value,
    pub errors: Vec<PayloadError>,
}

impl GraphQLResponse {
    /// A successful response.
    pub fn data(data: Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }
}

/// The transport boundary. Implementations own request encoding, transport,
/// and retries; the environment only consumes the resulting stream.
pub trait Network {
    fn execute(&self, operation: &OperationDescriptor) -> Observable<GraphQLResponse>;
}

type SelectorUpdaterFn = Rc<dyn Fn(&SelectorProxy<'_, '_>, &Value) -> Result<()>>;

/// Configuration for [`Environment::execute_mutation`].
pub struct MutationConfig {
    pub operation: OperationDescriptor,
    /// Applied optimistically before the network round trip, reverted on
    /// error or completion.
    pub optimistic_response: Option<Value>,
    pub optimistic_updater: Option<SelectorUpdaterFn>,
    /// Runs against each committed server payload.
    pub updater: Option<SelectorUpdaterFn>,
}

impl MutationConfig {
    pub fn new(operation: OperationDescriptor) -> Self {
        Self {
            operation,
            optimistic_response: None,
            optimistic_updater: None,
            updater: None,
        }
    }

    pub fn with_optimistic_response(mut self, response: Value) -> Self {
        self.optimistic_response = Some(response);
        self
    }

    pub fn with_optimistic_updater(
        mut self,
        updater: impl Fn(&SelectorProxy<'_, '_>, &Value) -> Result<()> + 'static,
    ) -> Self {
        self.optimistic_updater = Some(Rc::new(updater));
        self
    }

    pub fn with_updater(
        mut self,
        updater: impl Fn(&SelectorProxy<'_, '_>, &Value) -> Result<()> + 'static,
    ) -> Self {
        self.updater = Some(Rc::new(updater));
        self
    }
}

/// A store, its publish queue, and the network they are wired to.
pub struct Environment {
    store: Store,
    queue: PublishQueue,
    network: Box<dyn Network>,
    missing_field_handlers: Vec<MissingFieldHandler>,
}

impl Environment {
    pub fn new(fragments: FragmentCatalog, network: Box<dyn Network>) -> Self {
        Self {
            store: Store::new(fragments),
            queue: PublishQueue::new(),
            network,
            missing_field_handlers: Vec::new(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Register a handler for handle fields by name.
    pub fn register_handler(&mut self, handle: impl Into<String>, handler: impl Handler + 'static) {
        self.queue.handlers_mut().register(handle, handler);
    }

    /// Register a missing-field handler consulted by [`Environment::check`].
    pub fn add_missing_field_handler(&mut self, handler: MissingFieldHandler) {
        self.missing_field_handlers.push(handler);
    }

    pub fn lookup(&self, selector: &Selector) -> Result<Snapshot> {
        self.store.lookup(selector)
    }

    /// Check a selector, consulting the environment's missing-field
    /// handlers and patching their substitutes into the store.
    pub fn check(&mut self, selector: &Selector) -> Result<bool> {
        self.store
            .check_with_handlers(selector, &self.missing_field_handlers)
    }

    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> SubscriptionToken {
        self.store.subscribe(snapshot, callback)
    }

    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.store.unsubscribe(token);
    }

    pub fn retain(&mut self, selector: Selector) -> RetainToken {
        self.store.retain(selector)
    }

    pub fn release(&mut self, token: RetainToken) {
        self.store.release(token);
    }

    /// Publish a server response for an operation and notify subscribers.
    pub fn commit_payload(
        &mut self,
        operation: &OperationDescriptor,
        response: &Value,
    ) -> Result<usize> {
        self.queue
            .commit_payload(self.store.fragments(), operation, response)?;
        self.run_and_notify()
    }

    /// Commit a non-revertible updater and notify subscribers.
    pub fn commit_update(
        &mut self,
        updater: impl FnOnce(&RecordSourceProxy<'_>) -> Result<()> + 'static,
    ) -> Result<usize> {
        self.queue.commit_update(updater);
        self.run_and_notify()
    }

    /// Apply a revertible optimistic update and notify subscribers.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> Result<UpdateToken> {
        let token = self.queue.apply_update(update);
        self.run_and_notify()?;
        Ok(token)
    }

    /// Revert an optimistic update and notify subscribers.
    pub fn revert_update(&mut self, token: UpdateToken) -> Result<()> {
        self.queue.revert_update(token);
        self.run_and_notify()?;
        Ok(())
    }

    /// Execute a mutation against the network.
    ///
    /// Calling this is the subscribe point of the mutation's stream: the
    /// optimistic update (if any) is applied first, each server payload is
    /// committed and forwarded to `observer`, and the optimistic update is
    /// reverted on error or completion.
    pub fn execute_mutation(
        &mut self,
        config: MutationConfig,
        observer: &mut dyn Observer<ResponsePayload>,
    ) -> Result<()> {
        let MutationConfig {
            operation,
            optimistic_response,
            optimistic_updater,
            updater,
        } = config;

        let optimistic_token = if optimistic_response.is_some() || optimistic_updater.is_some() {
            let update = OptimisticUpdate::Selector {
                operation: operation.clone(),
                response: optimistic_response,
                updater: optimistic_updater,
            };
            let token = self.queue.apply_update(update);
            self.run_and_notify()?;
            Some(token)
        } else {
            None
        };

        let events = self.network.execute(&operation).collect();
        let outcome = self.process_mutation_events(&operation, updater, events, observer);

        if let Some(token) = optimistic_token {
            self.queue.revert_update(token);
            self.run_and_notify()?;
        }

        match outcome? {
            Some(error) => observer.error(error),
            None => observer.complete(),
        }
        Ok(())
    }

    /// Commit each payload in order. A soft failure (network error event or
    /// payload errors) stops processing and is reported on the observer's
    /// error channel by the caller, after the optimistic revert.
    fn process_mutation_events(
        &mut self,
        operation: &OperationDescriptor,
        updater: Option<SelectorUpdaterFn>,
        events: Vec<Event<GraphQLResponse>>,
        observer: &mut dyn Observer<ResponsePayload>,
    ) -> Result<Option<Error>> {
        for event in events {
            match event {
                Event::Next(response) => {
                    if !response.errors.is_empty() {
                        let message = response
                            .errors
                            .iter()
                            .map(|error| error.message.as_str())
                            .collect::<Vec<_>>()
                            .join("; ");
                        return Ok(Some(Error::Network(message)));
                    }
                    let mut source = RecordSource::new();
                    let field_payloads = normalize(
                        &mut source,
                        self.store.fragments(),
                        &operation.root,
                        &response.data,
                    )?;
                    let payload = ResponsePayload {
                        source,
                        field_payloads,
                        errors: Vec::new(),
                    };
                    self.queue.commit_response(payload.clone());
                    if let Some(updater) = &updater {
                        let updater = Rc::clone(updater);
                        let operation = operation.clone();
                        let data = response.data.clone();
                        self.queue.commit_update(move |proxy| {
                            updater(&SelectorProxy::new(proxy, &operation), &data)
                        });
                    }
                    self.run_and_notify()?;
                    observer.next(payload);
                }
                Event::Error(error) => return Ok(Some(error)),
                Event::Complete => break,
            }
        }
        Ok(None)
    }

    fn run_and_notify(&mut self) -> Result<usize> {
        self.queue.run(&mut self.store)?;
        self.store.notify()
    }
}
