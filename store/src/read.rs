//! Reading - materializing a selector against a record source.
//!
//! The reader mirrors the normalizer's traversal, producing a tree-shaped
//! data value plus the set of record identities the result depends on.
//! Missing data is reported, never raised: an unfetched record or field
//! sets `is_missing_data` and leaves a hole in the tree. Every visited
//! identity lands in `seen_records`, including targets of dangling links,
//! so a later write to them re-triggers the read.

use crate::{
    ast::{FragmentCatalog, HandleField, LinkedField, ScalarField, Selection, Selector},
    error::Result,
    DataId, Error, FieldValue, Record, RecordSourceRead, RecordState, Variables,
};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A materialized read result plus its dependency set.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The selector this snapshot was read from
    pub selector: Selector,
    /// Tree-shaped data mirroring the selection shape. `None` when the root
    /// was never fetched; `Some(Value::Null)` when it is known nonexistent.
    pub data: Option<Value>,
    /// Every record identity the data depends on
    pub seen_records: HashSet<DataId>,
    /// Whether any requested data was not available
    pub is_missing_data: bool,
}

/// Read `selector` from `source`.
pub fn read<S: RecordSourceRead>(
    source: &S,
    fragments: &FragmentCatalog,
    selector: &Selector,
) -> Result<Snapshot> {
    let mut reader = Reader {
        source,
        fragments,
        owner: selector.owner.clone(),
        seen: HashSet::new(),
        missing: false,
        active_spreads: HashSet::new(),
    };
    let data = reader.read_record(&selector.data_id, &selector.selections, &selector.variables)?;
    Ok(Snapshot {
        selector: selector.clone(),
        data,
        seen_records: reader.seen,
        is_missing_data: reader.missing,
    })
}

struct Reader<'a, S> {
    source: &'a S,
    fragments: &'a FragmentCatalog,
    owner: Option<String>,
    seen: HashSet<DataId>,
    missing: bool,
    active_spreads: HashSet<(DataId, String)>,
}

impl<'a, S: RecordSourceRead> Reader<'a, S> {
    fn read_record(
        &mut self,
        id: &str,
        selections: &[Selection],
        variables: &Variables,
    ) -> Result<Option<Value>> {
        self.seen.insert(id.to_string());
        let source = self.source;
        match source.status(id) {
            RecordState::Unknown => {
                self.missing = true;
                Ok(None)
            }
            RecordState::Nonexistent => Ok(Some(Value::Null)),
            RecordState::Existent => {
                let Some(record) = source.get(id) else {
                    self.missing = true;
                    return Ok(None);
                };
                let mut data = Map::new();
                self.traverse(record, selections, variables, &mut data)?;
                Ok(Some(Value::Object(data)))
            }
        }
    }

    fn traverse(
        &mut self,
        record: &'a Record,
        selections: &[Selection],
        variables: &Variables,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.read_scalar(record, field, variables, out)?,
                Selection::Linked(field) if field.plural => {
                    self.read_plural(record, field, variables, out)?
                }
                Selection::Linked(field) => self.read_linked(record, field, variables, out)?,
                Selection::Inline(fragment) => {
                    if self.typename_matches(record, fragment.type_condition.as_deref()) {
                        self.traverse(record, &fragment.selections, variables, out)?;
                    }
                }
                Selection::Spread(spread) if spread.masked => {
                    self.emit_fragment_pointer(record, spread, variables, out);
                }
                Selection::Spread(spread) => {
                    let fragments: &'a FragmentCatalog = self.fragments;
                    let fragment = fragments.get(&spread.fragment)?;
                    if !self.typename_matches(record, fragment.type_condition.as_deref()) {
                        continue;
                    }
                    let guard = (record.id.clone(), spread.fragment.clone());
                    if !self.active_spreads.insert(guard.clone()) {
                        continue;
                    }
                    let child_variables = spread.child_variables(variables);
                    self.traverse(record, &fragment.selections, &child_variables, out)?;
                    self.active_spreads.remove(&guard);
                }
                Selection::Condition(condition) => {
                    if condition.passes(variables)? {
                        self.traverse(record, &condition.selections, variables, out)?;
                    }
                }
                Selection::Handle(handle) => self.read_handle(record, handle, variables, out)?,
            }
        }
        Ok(())
    }

    fn read_scalar(
        &mut self,
        record: &Record,
        field: &ScalarField,
        variables: &Variables,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        match record.get(&field.storage_key(variables)) {
            None | Some(FieldValue::Missing) => self.missing = true,
            Some(FieldValue::Scalar(value)) => {
                out.insert(field.response_key().to_string(), value.clone());
            }
            Some(_) => {
                return Err(Error::UnexpectedFieldType {
                    id: record.id.clone(),
                    field: field.name.clone(),
                    expected: "a scalar",
                });
            }
        }
        Ok(())
    }

    fn read_linked(
        &mut self,
        record: &Record,
        field: &LinkedField,
        variables: &Variables,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        match record.get(&field.storage_key(variables)) {
            None | Some(FieldValue::Missing) => self.missing = true,
            Some(FieldValue::Scalar(Value::Null)) => {
                out.insert(field.response_key().to_string(), Value::Null);
            }
            Some(FieldValue::Link(child)) => {
                let child = child.clone();
                if let Some(value) = self.read_record(&child, &field.selections, variables)? {
                    out.insert(field.response_key().to_string(), value);
                }
            }
            Some(_) => {
                return Err(Error::UnexpectedFieldType {
                    id: record.id.clone(),
                    field: field.name.clone(),
                    expected: "a singular linked record",
                });
            }
        }
        Ok(())
    }

    fn read_plural(
        &mut self,
        record: &Record,
        field: &LinkedField,
        variables: &Variables,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        match record.get(&field.storage_key(variables)) {
            None | Some(FieldValue::Missing) => self.missing = true,
            Some(FieldValue::Scalar(Value::Null)) => {
                out.insert(field.response_key().to_string(), Value::Null);
            }
            Some(FieldValue::LinkList(ids)) => {
                let ids = ids.clone();
                let mut items = Vec::with_capacity(ids.len());
                for child in &ids {
                    match child {
                        None => items.push(Value::Null),
                        Some(child) => {
                            let value = self.read_record(child, &field.selections, variables)?;
                            items.push(value.unwrap_or(Value::Null));
                        }
                    }
                }
                out.insert(field.response_key().to_string(), Value::Array(items));
            }
            Some(_) => {
                return Err(Error::UnexpectedFieldType {
                    id: record.id.clone(),
                    field: field.name.clone(),
                    expected: "a plural linked field",
                });
            }
        }
        Ok(())
    }

    fn read_handle(
        &mut self,
        record: &Record,
        handle: &HandleField,
        variables: &Variables,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        match (record.get(&handle.handle_key(variables)), &handle.selections) {
            (None | Some(FieldValue::Missing), _) => self.missing = true,
            (Some(FieldValue::Scalar(value)), None) => {
                out.insert(handle.response_key().to_string(), value.clone());
            }
            (Some(FieldValue::Link(child)), Some(selections)) => {
                let child = child.clone();
                if let Some(value) = self.read_record(&child, selections, variables)? {
                    out.insert(handle.response_key().to_string(), value);
                }
            }
            (Some(FieldValue::LinkList(ids)), Some(selections)) => {
                let ids = ids.clone();
                let mut items = Vec::with_capacity(ids.len());
                for child in &ids {
                    match child {
                        None => items.push(Value::Null),
                        Some(child) => {
                            let value = self.read_record(child, selections, variables)?;
                            items.push(value.unwrap_or(Value::Null));
                        }
                    }
                }
                out.insert(handle.response_key().to_string(), Value::Array(items));
            }
            _ => {
                return Err(Error::UnexpectedFieldType {
                    id: record.id.clone(),
                    field: handle.name.clone(),
                    expected: if handle.selections.is_some() {
                        "a linked handle"
                    } else {
                        "a scalar handle"
                    },
                });
            }
        }
        Ok(())
    }

    /// Masked spreads produce a pointer the child consumer re-reads
    /// independently, instead of inlining the fragment here.
    fn emit_fragment_pointer(
        &mut self,
        record: &Record,
        spread: &crate::ast::FragmentSpread,
        variables: &Variables,
        out: &mut Map<String, Value>,
    ) {
        let child_variables = spread.child_variables(variables);
        out.insert("__id".to_string(), Value::String(record.id.clone()));
        let fragments = out
            .entry("__fragments".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = fragments {
            map.insert(
                spread.fragment.clone(),
                Value::Object(Map::from_iter(child_variables)),
            );
        }
        if let Some(owner) = &self.owner {
            out.insert("__fragmentOwner".to_string(), Value::String(owner.clone()));
        }
    }

    fn typename_matches(&mut self, record: &Record, condition: Option<&str>) -> bool {
        let Some(condition) = condition else {
            return true;
        };
        match record.typename.as_deref() {
            Some(typename) => typename == condition,
            None => {
                // soft path: unknown concrete type reads as missing data
                self.missing = true;
                false
            }
        }
    }
}
