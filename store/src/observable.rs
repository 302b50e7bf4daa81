//! A minimal lazy observable for the network boundary.
//!
//! Nothing runs until a consumer subscribes, and a subscription sees at
//! most one terminal event; anything a sloppy source emits after its
//! terminal is discarded.

use crate::Error;

/// An emission from an observable.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
    Next(T),
    Error(Error),
    Complete,
}

/// Receiver half of a subscription.
pub trait Observer<T> {
    fn next(&mut self, value: T);
    fn error(&mut self, error: Error);
    fn complete(&mut self);
}

/// A lazy pull-initiated stream of values.
pub struct Observable<T> {
    source: Box<dyn FnOnce(&mut dyn Observer<T>)>,
}

impl<T: 'static> Observable<T> {
    /// Wrap a source function; it runs when a consumer subscribes.
    pub fn new(source: impl FnOnce(&mut dyn Observer<T>) + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// An observable that emits the given values and completes.
    pub fn of(values: Vec<T>) -> Self {
        Self::new(move |observer| {
            for value in values {
                observer.next(value);
            }
            observer.complete();
        })
    }

    /// An observable that fails immediately.
    pub fn failed(error: Error) -> Self {
        Self::new(move |observer| observer.error(error))
    }

    /// Run the source against an observer.
    pub fn subscribe(self, observer: &mut dyn Observer<T>) {
        let mut guard = TerminalGuard {
            inner: observer,
            terminated: false,
        };
        (self.source)(&mut guard);
    }

    /// Subscribe with a buffering observer and return everything emitted.
    pub fn collect(self) -> Vec<Event<T>> {
        let mut buffer = EventBuffer { events: Vec::new() };
        self.subscribe(&mut buffer);
        buffer.events
    }
}

struct TerminalGuard<'o, T> {
    inner: &'o mut dyn Observer<T>,
    terminated: bool,
}

impl<T> Observer<T> for TerminalGuard<'_, T> {
    fn next(&mut self, value: T) {
        if !self.terminated {
            self.inner.next(value);
        }
    }

    fn error(&mut self, error: Error) {
        if !self.terminated {
            self.terminated = true;
            self.inner.error(error);
        }
    }

    fn complete(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.inner.complete();
        }
    }
}

struct EventBuffer<T> {
    events: Vec<Event<T>>,
}

impl<T> Observer<T> for EventBuffer<T> {
    fn next(&mut self, value: T) {
        self.events.push(Event::Next(value));
    }

    fn error(&mut self, error: Error) {
        self.events.push(Event::Error(error));
    }

    fn complete(&mut self) {
        self.events.push(Event::Complete);
    }
}
