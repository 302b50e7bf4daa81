//! Store - the authoritative record source and its subscribers.
//!
//! The store owns the base source. Everything else writes through transient
//! overlays that arrive here via [`Store::publish`]; subscribers are told
//! about changes only on [`Store::notify`], and only when the records their
//! snapshot depends on actually changed. Released retainers schedule a
//! mark-sweep collection that runs at the end of the next notify tick, so
//! a burst of releases is coalesced into one pass.

use crate::{
    ast::{FragmentCatalog, Selector},
    check::MissingFieldHandler,
    error::Result,
    read::{read, Snapshot},
    source::Entry,
    DataId, OverlaySource, Record, RecordSource, RecordSourceRead, RecordState, ROOT_ID,
};
use std::collections::{HashMap, HashSet};

/// Handle for an active subscription; consumed by [`Store::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionToken(u64);

/// Handle for a retained selector; consumed by [`Store::release`].
#[derive(Debug)]
pub struct RetainToken(u64);

struct SubscriptionEntry {
    id: u64,
    snapshot: Snapshot,
    callback: Box<dyn FnMut(&Snapshot)>,
    /// The snapshot may predate changes that accumulated before the
    /// subscription was registered; re-read unconditionally on next notify.
    stale: bool,
}

/// The store: base record source, subscriptions, and retention.
pub struct Store {
    records: RecordSource,
    /// Overlay installed by the publish queue while optimistic updates are
    /// live; reads go through it, the base stays untouched.
    optimistic: Option<RecordSource>,
    fragments: FragmentCatalog,
    subscriptions: Vec<SubscriptionEntry>,
    retained: HashMap<u64, Selector>,
    updated: HashSet<DataId>,
    next_token: u64,
    gc_scheduled: bool,
}

impl Store {
    /// Create an empty store resolving fragment spreads from `fragments`.
    pub fn new(fragments: FragmentCatalog) -> Self {
        Self::with_source(fragments, RecordSource::new())
    }

    /// Create a store over a pre-populated base source.
    pub fn with_source(fragments: FragmentCatalog, records: RecordSource) -> Self {
        Self {
            records,
            optimistic: None,
            fragments,
            subscriptions: Vec::new(),
            retained: HashMap::new(),
            updated: HashSet::new(),
            next_token: 0,
            gc_scheduled: false,
        }
    }

    /// The base record source.
    pub fn source(&self) -> &RecordSource {
        &self.records
    }

    /// The fragment catalog selectors are resolved against.
    pub fn fragments(&self) -> &FragmentCatalog {
        &self.fragments
    }

    /// Merge an overlay source into the base record-by-record, accumulating
    /// the identities whose value actually changed.
    pub fn publish(&mut self, source: RecordSource) {
        for (id, entry) in source.into_entries() {
            match entry {
                Entry::Tombstone => {
                    if self.records.status(&id) != RecordState::Nonexistent {
                        self.updated.insert(id.clone());
                    }
                    self.records.delete(id);
                }
                Entry::Record(next) => match self.records.get_mut(&id) {
                    Some(prev) => {
                        let before = prev.clone();
                        prev.update_from(&next);
                        if *prev != before {
                            self.updated.insert(id);
                        }
                    }
                    None => {
                        self.records.set(next);
                        self.updated.insert(id);
                    }
                },
            }
        }
        tracing::debug!(updated = self.updated.len(), "published into the base source");
    }

    /// Swap the optimistic overlay, accumulating the identities whose
    /// visible value changes with the swap.
    pub(crate) fn replace_optimistic(&mut self, overlay: Option<RecordSource>) {
        let old = self.optimistic.take();
        let mut touched: HashSet<DataId> = HashSet::new();
        if let Some(old) = &old {
            touched.extend(old.record_ids().cloned());
        }
        if let Some(new) = &overlay {
            touched.extend(new.record_ids().cloned());
        }
        for id in touched {
            let before = visible_entry(old.as_ref(), &self.records, &id);
            let after = visible_entry(overlay.as_ref(), &self.records, &id);
            if before != after {
                self.updated.insert(id);
            }
        }
        self.optimistic = overlay;
    }

    pub(crate) fn has_optimistic(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Read a selector through the optimistic overlay when one is live.
    pub fn lookup(&self, selector: &Selector) -> Result<Snapshot> {
        match &self.optimistic {
            Some(overlay) => read(
                &OverlaySource::new(overlay, &self.records),
                &self.fragments,
                selector,
            ),
            None => read(&self.records, &self.fragments, selector),
        }
    }

    /// Check a selector against the base source, without handlers.
    pub fn check(&mut self, selector: &Selector) -> Result<bool> {
        self.check_with_handlers(selector, &[])
    }

    /// Check a selector, letting `handlers` patch missing fields into the
    /// base source.
    pub fn check_with_handlers(
        &mut self,
        selector: &Selector,
        handlers: &[MissingFieldHandler],
    ) -> Result<bool> {
        crate::check::check(&mut self.records, &self.fragments, selector, handlers)
    }

    /// Register a subscriber for changes to the records `snapshot` depends
    /// on. The callback fires on [`Store::notify`] when the re-read data
    /// structurally differs from the last snapshot delivered.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> SubscriptionToken {
        let id = self.next_token();
        let stale = !snapshot.seen_records.is_disjoint(&self.updated);
        self.subscriptions.push(SubscriptionEntry {
            id,
            snapshot,
            callback: Box::new(callback),
            stale,
        });
        SubscriptionToken(id)
    }

    /// Drop a subscription. Consuming the token makes disposal idempotent.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        self.subscriptions.retain(|entry| entry.id != token.0);
    }

    /// Pin every record reachable from `selector` against collection.
    pub fn retain(&mut self, selector: Selector) -> RetainToken {
        let id = self.next_token();
        self.retained.insert(id, selector);
        RetainToken(id)
    }

    /// Release a retained selector and schedule a collection pass.
    pub fn release(&mut self, token: RetainToken) {
        if self.retained.remove(&token.0).is_some() {
            self.gc_scheduled = true;
        }
    }

    /// Re-read every affected subscription, dispatch callbacks for the ones
    /// whose data changed, and run any scheduled collection. Returns the
    /// number of callbacks fired.
    pub fn notify(&mut self) -> Result<usize> {
        let updated = std::mem::take(&mut self.updated);
        let mut subscriptions = std::mem::take(&mut self.subscriptions);
        let mut fired = 0;
        let mut failure = None;
        for entry in subscriptions.iter_mut() {
            if !entry.stale && entry.snapshot.seen_records.is_disjoint(&updated) {
                continue;
            }
            match self.lookup(&entry.snapshot.selector) {
                Ok(next) => {
                    entry.stale = false;
                    if next.data != entry.snapshot.data {
                        (entry.callback)(&next);
                        entry.snapshot = next;
                        fired += 1;
                    }
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        self.subscriptions = subscriptions;
        if let Some(error) = failure {
            // keep the change set so a later notify can retry
            self.updated.extend(updated);
            return Err(error);
        }
        if self.gc_scheduled {
            self.run_gc()?;
            self.gc_scheduled = false;
        }
        tracing::debug!(notified = fired, "notified subscribers");
        Ok(fired)
    }

    /// Mark-sweep collection: seed from the root and every retained
    /// selector, then drop everything unreached from the base source.
    fn run_gc(&mut self) -> Result<()> {
        let mut reachable: HashSet<DataId> = HashSet::new();
        reachable.insert(ROOT_ID.to_string());
        for selector in self.retained.values() {
            let snapshot = read(&self.records, &self.fragments, selector)?;
            reachable.extend(snapshot.seen_records);
        }
        let before = self.records.size();
        self.records.retain_ids(&reachable);
        tracing::debug!(
            collected = before - self.records.size(),
            "garbage collected"
        );
        Ok(())
    }

    fn next_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

fn visible_entry<'s>(
    overlay: Option<&'s RecordSource>,
    base: &'s RecordSource,
    id: &str,
) -> (RecordState, Option<&'s Record>) {
    match overlay {
        Some(overlay) if overlay.status(id) != RecordState::Unknown => {
            (overlay.status(id), overlay.get(id))
        }
        _ => (base.status(id), base.get(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Argument, LinkedField, ScalarField, Selection};
    use crate::normalize::normalize;
    use crate::{FieldValue, Variables};
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn user_selector(id: &str) -> Selector {
        Selector::root(
            vec![Selection::Linked(
                LinkedField::new(
                    "user",
                    vec![
                        Selection::Scalar(ScalarField::new("id")),
                        Selection::Scalar(ScalarField::new("name")),
                    ],
                )
                .with_args(vec![Argument::literal("id", json!(id))]),
            )],
            Variables::new(),
        )
    }

    fn payload_source(selector: &Selector, response: Value) -> RecordSource {
        let mut source = RecordSource::new();
        normalize(&mut source, &FragmentCatalog::new(), selector, &response).unwrap();
        source
    }

    fn user_payload(id: &str, name: &str) -> RecordSource {
        payload_source(
            &user_selector(id),
            json!({"user": {"id": id, "name": name, "__typename": "User"}}),
        )
    }

    fn observed_names(store: &mut Store, selector: &Selector) -> (SubscriptionToken, Rc<RefCell<Vec<Value>>>) {
        let snapshot = store.lookup(selector).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let token = store.subscribe(snapshot, move |next| {
            let name = next
                .data
                .as_ref()
                .map(|data| data["user"]["name"].clone())
                .unwrap_or(Value::Null);
            sink.borrow_mut().push(name);
        });
        (token, seen)
    }

    #[test]
    fn publish_then_notify_dispatches_to_subscribers() {
        let mut store = Store::new(FragmentCatalog::new());
        let selector = user_selector("4");
        let (_token, seen) = observed_names(&mut store, &selector);

        store.publish(user_payload("4", "Zuck"));
        let fired = store.notify().unwrap();

        assert_eq!(fired, 1);
        assert_eq!(&*seen.borrow(), &[json!("Zuck")]);
    }

    #[test]
    fn notify_skips_disjoint_subscribers() {
        let mut store = Store::new(FragmentCatalog::new());
        store.publish(user_payload("4", "Zuck"));
        store.notify().unwrap();

        let selector = user_selector("4");
        let (_token, seen) = observed_names(&mut store, &selector);

        // unrelated record: the subscriber overlaps the publish only at the
        // shared root, and its re-read data is unchanged
        store.publish(user_payload("9", "Leon"));
        store.notify().unwrap();

        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn notify_suppresses_structurally_equal_data() {
        let mut store = Store::new(FragmentCatalog::new());
        store.publish(user_payload("4", "Zuck"));
        store.notify().unwrap();

        let selector = user_selector("4");
        let (_token, seen) = observed_names(&mut store, &selector);

        // same value again: the record merge is a no-op
        store.publish(user_payload("4", "Zuck"));
        assert_eq!(store.notify().unwrap(), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn effects_accumulate_between_notifies() {
        let mut store = Store::new(FragmentCatalog::new());
        let selector = user_selector("4");
        let (_token, seen) = observed_names(&mut store, &selector);

        store.publish(user_payload("4", "Zuck"));
        store.publish(user_payload("4", "Zuckerberg"));
        let fired = store.notify().unwrap();

        // one callback with the net result
        assert_eq!(fired, 1);
        assert_eq!(&*seen.borrow(), &[json!("Zuckerberg")]);
    }

    #[test]
    fn unsubscribe_stops_dispatch() {
        let mut store = Store::new(FragmentCatalog::new());
        let selector = user_selector("4");
        let (token, seen) = observed_names(&mut store, &selector);

        store.unsubscribe(token);
        store.publish(user_payload("4", "Zuck"));
        store.notify().unwrap();

        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn stale_subscriptions_are_reread_on_next_notify() {
        let mut store = Store::new(FragmentCatalog::new());
        let selector = user_selector("4");
        let snapshot = store.lookup(&selector).unwrap();

        // the change lands before the subscription does
        store.publish(user_payload("4", "Zuck"));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.subscribe(snapshot, move |next| {
            sink.borrow_mut().push(next.data.clone());
        });

        store.notify().unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn optimistic_overlay_shadows_reads_until_replaced() {
        let mut store = Store::new(FragmentCatalog::new());
        store.publish(user_payload("4", "Zuck"));
        store.notify().unwrap();

        let mut overlay = RecordSource::new();
        let mut user = store.source().get("4").unwrap().clone();
        user.set("name", FieldValue::Scalar(json!("Mark")));
        overlay.set(user);
        store.replace_optimistic(Some(overlay));

        let selector = user_selector("4");
        let snapshot = store.lookup(&selector).unwrap();
        assert_eq!(snapshot.data.unwrap()["user"]["name"], json!("Mark"));
        // the base is untouched
        assert_eq!(
            store
                .source()
                .get("4")
                .and_then(|r| r.get("name"))
                .and_then(FieldValue::as_scalar),
            Some(&json!("Zuck"))
        );

        store.replace_optimistic(None);
        let snapshot = store.lookup(&selector).unwrap();
        assert_eq!(snapshot.data.unwrap()["user"]["name"], json!("Zuck"));
    }

    #[test]
    fn overlay_swaps_mark_affected_records() {
        let mut store = Store::new(FragmentCatalog::new());
        store.publish(user_payload("4", "Zuck"));
        store.notify().unwrap();

        let selector = user_selector("4");
        let (_token, seen) = observed_names(&mut store, &selector);

        let mut overlay = RecordSource::new();
        let mut user = store.source().get("4").unwrap().clone();
        user.set("name", FieldValue::Scalar(json!("Mark")));
        overlay.set(user);
        store.replace_optimistic(Some(overlay));
        store.notify().unwrap();

        store.replace_optimistic(None);
        store.notify().unwrap();

        assert_eq!(&*seen.borrow(), &[json!("Mark"), json!("Zuck")]);
    }

    #[test]
    fn release_schedules_collection_on_next_notify() {
        let mut store = Store::new(FragmentCatalog::new());
        let selector = user_selector("4");
        store.publish(user_payload("4", "Zuck"));
        store.notify().unwrap();

        let token = store.retain(selector.clone());

        // unrelated record
        store.publish(user_payload("9", "Leon"));
        store.notify().unwrap();

        store.release(token);
        store.notify().unwrap();

        // nothing retained: only the root survives
        assert_eq!(store.source().status("4"), RecordState::Unknown);
        assert_eq!(store.source().status("9"), RecordState::Unknown);
        assert_eq!(store.source().size(), 1);
        assert_eq!(store.source().status(ROOT_ID), RecordState::Existent);
    }

    #[test]
    fn retained_selectors_keep_their_reachable_records() {
        let mut store = Store::new(FragmentCatalog::new());
        store.publish(user_payload("4", "Zuck"));
        store.publish(user_payload("9", "Leon"));
        store.notify().unwrap();

        let keep = store.retain(user_selector("4"));
        let drop_me = store.retain(user_selector("9"));
        store.release(drop_me);
        store.notify().unwrap();

        assert_eq!(store.source().status("4"), RecordState::Existent);
        assert_eq!(store.source().status("9"), RecordState::Unknown);

        store.release(keep);
        store.notify().unwrap();
        assert_eq!(store.source().status("4"), RecordState::Unknown);
    }
}
