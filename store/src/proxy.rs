//! Updater-facing views over a record source.
//!
//! User updaters never touch the base source directly. They receive a
//! [`RecordSourceProxy`]: reads fall through to the base, writes accumulate
//! copy-on-write in a sibling sink source that the publish pipeline later
//! merges or installs as an overlay. Dropping the proxy without extracting
//! the sink discards every write, which is what makes failed publishes
//! leave no partial state behind.

use crate::{
    ast::{OperationDescriptor, Selection},
    error::Result,
    key, DataId, Error, FieldValue, Record, RecordSource, RecordSourceRead, RecordState, TypeName,
    ROOT_ID,
};
use serde_json::Value;
use std::cell::RefCell;
use std::ops::Deref;

/// A writable overlay over a base record source.
pub struct RecordSourceProxy<'a> {
    base: &'a RecordSource,
    sink: RefCell<RecordSource>,
}

impl<'a> RecordSourceProxy<'a> {
    /// A proxy with an empty sink.
    pub fn new(base: &'a RecordSource) -> Self {
        Self::with_sink(base, RecordSource::new())
    }

    /// A proxy resuming writes into an existing sink.
    pub(crate) fn with_sink(base: &'a RecordSource, sink: RecordSource) -> Self {
        Self {
            base,
            sink: RefCell::new(sink),
        }
    }

    /// Extract the accumulated writes.
    pub fn into_sink(self) -> RecordSource {
        self.sink.into_inner()
    }

    pub(crate) fn with_sink_mut<R>(&self, f: impl FnOnce(&mut RecordSource) -> R) -> R {
        f(&mut self.sink.borrow_mut())
    }

    /// Status of an identity through the overlay.
    pub fn status(&self, id: &str) -> RecordState {
        match self.sink.borrow().status(id) {
            RecordState::Unknown => self.base.status(id),
            known => known,
        }
    }

    /// Get a proxy for an existing record.
    pub fn get(&self, id: &str) -> Option<RecordProxy<'_, 'a>> {
        match self.status(id) {
            RecordState::Existent => Some(RecordProxy {
                source: self,
                id: id.to_string(),
            }),
            _ => None,
        }
    }

    /// Create a record. Fails if the identity already resolves to one.
    pub fn create(
        &self,
        id: impl Into<DataId>,
        typename: impl Into<TypeName>,
    ) -> Result<RecordProxy<'_, 'a>> {
        let id = id.into();
        if self.status(&id) == RecordState::Existent {
            return Err(Error::RecordAlreadyExists(id));
        }
        self.sink
            .borrow_mut()
            .set(Record::with_typename(id.clone(), typename));
        Ok(RecordProxy { source: self, id })
    }

    /// Mark an identity nonexistent in the overlay.
    pub fn delete(&self, id: &str) {
        self.sink.borrow_mut().delete(id.to_string());
    }

    /// The root record, created on demand.
    pub fn root(&self) -> RecordProxy<'_, 'a> {
        if self.status(ROOT_ID) != RecordState::Existent {
            self.sink.borrow_mut().get_or_create(ROOT_ID);
        }
        RecordProxy {
            source: self,
            id: ROOT_ID.to_string(),
        }
    }
}

/// A single record viewed through a [`RecordSourceProxy`].
///
/// Writes are buffered into the proxy's sink under the storage key computed
/// for the given field name and arguments; the first write copies the base
/// record into the sink.
#[derive(Clone)]
pub struct RecordProxy<'p, 'a> {
    source: &'p RecordSourceProxy<'a>,
    id: DataId,
}

impl<'p, 'a> RecordProxy<'p, 'a> {
    pub fn data_id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> Option<TypeName> {
        self.read(|record| record.typename.clone()).flatten()
    }

    /// Get a scalar field value.
    pub fn get_value(&self, name: &str, args: &[(&str, Value)]) -> Result<Option<Value>> {
        let key = key::storage_key_literal(name, args);
        match self.read(|record| record.get(&key).cloned()).flatten() {
            None | Some(FieldValue::Missing) => Ok(None),
            Some(FieldValue::Scalar(value)) => Ok(Some(value)),
            Some(_) => Err(self.type_error(name, "a scalar")),
        }
    }

    /// Set a scalar field value.
    pub fn set_value(&self, name: &str, args: &[(&str, Value)], value: Value) -> &Self {
        let key = key::storage_key_literal(name, args);
        self.write(|record| record.set(key, FieldValue::Scalar(value)));
        self
    }

    /// Get the record a singular link points at, if any.
    pub fn get_linked_record(
        &self,
        name: &str,
        args: &[(&str, Value)],
    ) -> Result<Option<RecordProxy<'p, 'a>>> {
        let key = key::storage_key_literal(name, args);
        self.linked_by_key(name, &key)
    }

    /// Point a singular link at another record.
    pub fn set_linked_record(
        &self,
        name: &str,
        args: &[(&str, Value)],
        record: &RecordProxy<'_, '_>,
    ) -> &Self {
        let key = key::storage_key_literal(name, args);
        let child = record.id.clone();
        self.write(|record| record.set(key, FieldValue::Link(child)));
        self
    }

    /// Get the records a plural link points at, if any. Entries that are
    /// explicit nulls or not yet fetched come back as `None`.
    pub fn get_linked_records(
        &self,
        name: &str,
        args: &[(&str, Value)],
    ) -> Result<Option<Vec<Option<RecordProxy<'p, 'a>>>>> {
        let key = key::storage_key_literal(name, args);
        self.plural_by_key(name, &key)
    }

    /// Replace a plural link wholesale.
    pub fn set_linked_records(
        &self,
        name: &str,
        args: &[(&str, Value)],
        records: &[Option<&RecordProxy<'_, '_>>],
    ) -> &Self {
        let key = key::storage_key_literal(name, args);
        let ids = records
            .iter()
            .map(|record| record.map(|r| r.id.clone()))
            .collect();
        self.write(|record| record.set(key, FieldValue::LinkList(ids)));
        self
    }

    /// Follow a singular link, creating the target (under a client id
    /// derived from this record and the field) when it does not exist.
    pub fn get_or_create_linked_record(
        &self,
        name: &str,
        args: &[(&str, Value)],
        typename: impl Into<TypeName>,
    ) -> Result<RecordProxy<'p, 'a>> {
        if let Some(existing) = self.get_linked_record(name, args)? {
            return Ok(existing);
        }
        let key = key::storage_key_literal(name, args);
        let child_id = format!("{}:{}", self.id, key);
        if self.source.status(&child_id) != RecordState::Existent {
            self.source
                .sink
                .borrow_mut()
                .set(Record::with_typename(child_id.clone(), typename));
        }
        self.write(|record| record.set(key, FieldValue::Link(child_id.clone())));
        Ok(RecordProxy {
            source: self.source,
            id: child_id,
        })
    }

    /// Copy every field value from another record onto this one.
    pub fn copy_fields_from(&self, other: &RecordProxy<'_, '_>) -> &Self {
        if let Some(fields) = other.read(|record| record.fields.clone()) {
            self.write(|record| {
                for (key, value) in fields {
                    record.set(key, value);
                }
            });
        }
        self
    }

    fn linked_by_key(&self, name: &str, key: &str) -> Result<Option<RecordProxy<'p, 'a>>> {
        match self.read(|record| record.get(key).cloned()).flatten() {
            None | Some(FieldValue::Missing) | Some(FieldValue::Scalar(Value::Null)) => Ok(None),
            Some(FieldValue::Link(child)) => Ok(self.source.get(&child)),
            Some(_) => Err(self.type_error(name, "a singular linked record")),
        }
    }

    fn plural_by_key(&self, name: &str, key: &str) -> Result<Option<Vec<Option<RecordProxy<'p, 'a>>>>> {
        match self.read(|record| record.get(key).cloned()).flatten() {
            None | Some(FieldValue::Missing) | Some(FieldValue::Scalar(Value::Null)) => Ok(None),
            Some(FieldValue::LinkList(ids)) => Ok(Some(
                ids.iter()
                    .map(|id| id.as_deref().and_then(|id| self.source.get(id)))
                    .collect(),
            )),
            Some(_) => Err(self.type_error(name, "a plural linked field")),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Record) -> R) -> Option<R> {
        let sink = self.source.sink.borrow();
        match sink.status(&self.id) {
            RecordState::Existent => sink.get(&self.id).map(f),
            RecordState::Nonexistent => None,
            RecordState::Unknown => self.source.base.get(&self.id).map(f),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Record) -> R) -> R {
        let mut sink = self.source.sink.borrow_mut();
        if sink.status(&self.id) == RecordState::Unknown {
            if let Some(base) = self.source.base.get(&self.id) {
                sink.set(base.clone());
            }
        }
        f(sink.get_or_create(&self.id))
    }

    fn type_error(&self, field: &str, expected: &'static str) -> Error {
        Error::UnexpectedFieldType {
            id: self.id.clone(),
            field: field.to_string(),
            expected,
        }
    }
}

/// A [`RecordSourceProxy`] bound to an operation, giving updaters indexed
/// access to the operation's root fields.
pub struct SelectorProxy<'p, 'a> {
    source: &'p RecordSourceProxy<'a>,
    operation: &'p OperationDescriptor,
}

impl<'p, 'a> SelectorProxy<'p, 'a> {
    pub fn new(source: &'p RecordSourceProxy<'a>, operation: &'p OperationDescriptor) -> Self {
        Self { source, operation }
    }

    /// Get the record behind a singular root field of the operation.
    pub fn get_root_field(&self, name: &str) -> Result<Option<RecordProxy<'p, 'a>>> {
        let field = self.root_field(name, false)?;
        let key = field.storage_key(&self.operation.root.variables);
        let root = RecordProxy {
            source: self.source,
            id: ROOT_ID.to_string(),
        };
        root.linked_by_key(name, &key)
    }

    /// Get the records behind a plural root field of the operation.
    pub fn get_plural_root_field(
        &self,
        name: &str,
    ) -> Result<Option<Vec<Option<RecordProxy<'p, 'a>>>>> {
        let field = self.root_field(name, true)?;
        let key = field.storage_key(&self.operation.root.variables);
        let root = RecordProxy {
            source: self.source,
            id: ROOT_ID.to_string(),
        };
        root.plural_by_key(name, &key)
    }

    fn root_field(&self, name: &str, plural: bool) -> Result<&'p crate::ast::LinkedField> {
        self.operation
            .root
            .selections
            .iter()
            .find_map(|selection| match selection {
                Selection::Linked(field) if field.name == name && field.plural == plural => {
                    Some(field)
                }
                _ => None,
            })
            .ok_or_else(|| Error::Shape {
                field: name.to_string(),
                reason: "no such root field on the operation".into(),
            })
    }
}

impl<'a> Deref for SelectorProxy<'_, 'a> {
    type Target = RecordSourceProxy<'a>;

    fn deref(&self) -> &Self::Target {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Argument, LinkedField, ScalarField};
    use crate::Variables;
    use serde_json::json;

    fn base_with_user() -> RecordSource {
        let mut base = RecordSource::new();
        let mut user = Record::with_typename("4", "User");
        user.set("name", FieldValue::Scalar(json!("Zuck")));
        base.set(user);
        base
    }

    #[test]
    fn reads_fall_through_to_base() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        let user = proxy.get("4").unwrap();
        assert_eq!(user.data_id(), "4");
        assert_eq!(user.type_name().as_deref(), Some("User"));
        assert_eq!(user.get_value("name", &[]).unwrap(), Some(json!("Zuck")));
    }

    #[test]
    fn writes_do_not_touch_the_base() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        proxy
            .get("4")
            .unwrap()
            .set_value("name", &[], json!("Mark"));

        let sink = proxy.into_sink();
        assert_eq!(
            base.get("4")
                .and_then(|r| r.get("name"))
                .and_then(FieldValue::as_scalar),
            Some(&json!("Zuck"))
        );
        assert_eq!(
            sink.get("4")
                .and_then(|r| r.get("name"))
                .and_then(FieldValue::as_scalar),
            Some(&json!("Mark"))
        );
        // copy-on-write carried the type name into the sink copy
        assert_eq!(sink.get("4").unwrap().typename.as_deref(), Some("User"));
    }

    #[test]
    fn create_rejects_existing_identities() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        assert!(matches!(
            proxy.create("4", "User"),
            Err(Error::RecordAlreadyExists(_))
        ));

        let created = proxy.create("5", "User").unwrap();
        created.set_value("name", &[], json!("Pris"));
        assert_eq!(
            proxy.get("5").unwrap().get_value("name", &[]).unwrap(),
            Some(json!("Pris"))
        );
    }

    #[test]
    fn create_can_resurrect_a_deleted_identity() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        proxy.delete("4");
        assert!(proxy.get("4").is_none());
        assert_eq!(proxy.status("4"), RecordState::Nonexistent);

        proxy.create("4", "User").unwrap();
        assert!(proxy.get("4").is_some());
    }

    #[test]
    fn linked_records() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        let friend = proxy.create("5", "User").unwrap();
        friend.set_value("name", &[], json!("Pris"));

        let user = proxy.get("4").unwrap();
        user.set_linked_record("bestFriend", &[], &friend);

        let read_back = user.get_linked_record("bestFriend", &[]).unwrap().unwrap();
        assert_eq!(read_back.data_id(), "5");
        assert_eq!(read_back.get_value("name", &[]).unwrap(), Some(json!("Pris")));
    }

    #[test]
    fn plural_links_with_arguments() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);
        let args: &[(&str, Value)] = &[("first", json!(2))];

        let a = proxy.create("5", "User").unwrap();
        let b = proxy.create("6", "User").unwrap();
        proxy
            .get("4")
            .unwrap()
            .set_linked_records("friends", args, &[Some(&a), None, Some(&b)]);

        let friends = proxy
            .get("4")
            .unwrap()
            .get_linked_records("friends", args)
            .unwrap()
            .unwrap();
        assert_eq!(friends.len(), 3);
        assert_eq!(friends[0].as_ref().map(|r| r.data_id().to_string()), Some("5".into()));
        assert!(friends[1].is_none());

        // a different argument set is a different field
        assert!(proxy
            .get("4")
            .unwrap()
            .get_linked_records("friends", &[])
            .unwrap()
            .is_none());
    }

    #[test]
    fn get_or_create_uses_a_stable_client_id() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        let user = proxy.get("4").unwrap();
        let settings = user
            .get_or_create_linked_record("settings", &[], "Settings")
            .unwrap();
        assert_eq!(settings.data_id(), "4:settings");
        settings.set_value("darkMode", &[], json!(true));

        // a second call resolves the same record
        let again = user
            .get_or_create_linked_record("settings", &[], "Settings")
            .unwrap();
        assert_eq!(again.get_value("darkMode", &[]).unwrap(), Some(json!(true)));
    }

    #[test]
    fn copy_fields_from_copies_values_only() {
        let base = base_with_user();
        let proxy = RecordSourceProxy::new(&base);

        let twin = proxy.create("40", "User").unwrap();
        twin.copy_fields_from(&proxy.get("4").unwrap());

        assert_eq!(twin.data_id(), "40");
        assert_eq!(twin.get_value("name", &[]).unwrap(), Some(json!("Zuck")));
    }

    #[test]
    fn root_is_created_on_demand() {
        let base = RecordSource::new();
        let proxy = RecordSourceProxy::new(&base);

        proxy.root().set_value("viewerCount", &[], json!(7));
        assert_eq!(
            proxy
                .root()
                .get_value("viewerCount", &[])
                .unwrap(),
            Some(json!(7))
        );
    }

    #[test]
    fn selector_proxy_indexes_root_fields() {
        let operation = OperationDescriptor::new(
            "UserQuery",
            vec![Selection::Linked(
                LinkedField::new(
                    "user",
                    vec![Selection::Scalar(ScalarField::new("name"))],
                )
                .with_args(vec![Argument::literal("id", json!("4"))]),
            )],
            Variables::new(),
        );

        let mut base = base_with_user();
        let mut root = Record::new(ROOT_ID);
        root.set("user(id:\"4\")", FieldValue::Link("4".into()));
        base.set(root);

        let proxy = RecordSourceProxy::new(&base);
        let selector_proxy = SelectorProxy::new(&proxy, &operation);

        let user = selector_proxy.get_root_field("user").unwrap().unwrap();
        assert_eq!(user.data_id(), "4");

        assert!(matches!(
            selector_proxy.get_root_field("viewer"),
            Err(Error::Shape { .. })
        ));
    }
}
