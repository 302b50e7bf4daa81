//! Record values - the unit of normalized storage.
//!
//! A record is a flat mapping from storage key to field value, identified by
//! a stable [`DataId`]. Records never hold direct pointers to each other;
//! relationships are expressed as links resolved through the record source,
//! so cyclic data is representable without cyclic ownership.

use crate::{DataId, StorageKey, TypeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single field slot in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    /// A scalar leaf: number, string, boolean, null, or a scalar list.
    Scalar(Value),
    /// A reference to another record by identity.
    Link(DataId),
    /// An ordered list of references; `None` entries are explicit nulls.
    LinkList(Vec<Option<DataId>>),
    /// The field was requested but the server returned nothing for it.
    Missing,
}

impl FieldValue {
    /// Check whether this slot is the known-missing sentinel.
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    /// Get the scalar value, if this slot holds one.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Get the linked id, if this slot holds a singular link.
    pub fn as_link(&self) -> Option<&DataId> {
        match self {
            FieldValue::Link(id) => Some(id),
            _ => None,
        }
    }

    /// Get the linked ids, if this slot holds a plural link.
    pub fn as_link_list(&self) -> Option<&[Option<DataId>]> {
        match self {
            FieldValue::LinkList(ids) => Some(ids),
            _ => None,
        }
    }
}

/// A normalized record.
///
/// Field iteration order is deterministic (sorted by storage key), which
/// keeps serialized sources and test output stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// The record's own identity
    pub id: DataId,
    /// GraphQL type name, when known
    pub typename: Option<TypeName>,
    /// Field slots keyed by storage key
    pub fields: BTreeMap<StorageKey, FieldValue>,
}

impl Record {
    /// Create an empty record with no type information.
    pub fn new(id: impl Into<DataId>) -> Self {
        Self {
            id: id.into(),
            typename: None,
            fields: BTreeMap::new(),
        }
    }

    /// Create an empty record of a known type.
    pub fn with_typename(id: impl Into<DataId>, typename: impl Into<TypeName>) -> Self {
        Self {
            id: id.into(),
            typename: Some(typename.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Get a field slot by storage key.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Set a field slot, replacing any previous value wholesale.
    pub fn set(&mut self, key: impl Into<StorageKey>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    /// Field-wise merge: every field present in `other` overwrites the
    /// corresponding slot here; fields absent from `other` are left alone.
    /// Type information is taken from `other` when it has any.
    pub fn update_from(&mut self, other: &Record) {
        if other.typename.is_some() {
            self.typename = other.typename.clone();
        }
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}
