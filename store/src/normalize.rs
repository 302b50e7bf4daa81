//! Payload normalization - writing a response tree into a record source.
//!
//! The normalizer walks a selection AST and the matching response tree in
//! lockstep, flattening the nested payload into records linked by identity.
//! Child identities come from the payload's own `id` when it carries one,
//! otherwise a client id is synthesized from the parent identity and the
//! field's storage key, so re-normalizing the same parent and key always
//! lands on the same record.

use crate::{
    ast::{FragmentCatalog, HandleField, LinkedField, ScalarField, Selection, Selector},
    error::Result,
    key, DataId, Error, FieldValue, RecordSource, RecordSourceRead, StorageKey, Variables,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Instruction emitted for a handle field: the handler named `handle` is
/// expected to derive the value at `handle_key` from the data at
/// `field_key` on record `data_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleFieldPayload {
    /// Resolved field arguments
    pub args: Value,
    /// Record the handle field was reached on
    pub data_id: DataId,
    /// Storage key of the underlying server field
    pub field_key: StorageKey,
    /// Name of the registered handler
    pub handle: String,
    /// Storage key the handler writes under
    pub handle_key: StorageKey,
}

/// Normalize `response` into `source` under `selector`.
///
/// Returns the handle field payloads encountered, in traversal order. On
/// error the source may hold partial writes; callers that need atomicity
/// normalize into a fresh source and merge it afterwards.
pub fn normalize(
    source: &mut RecordSource,
    fragments: &FragmentCatalog,
    selector: &Selector,
    response: &Value,
) -> Result<Vec<HandleFieldPayload>> {
    let data = response.as_object().ok_or_else(|| Error::Shape {
        field: selector.data_id.clone(),
        reason: format!("expected a response object, got {}", kind_of(response)),
    })?;
    let mut normalizer = Normalizer {
        source,
        fragments,
        payloads: Vec::new(),
    };
    normalizer.ensure_record(&selector.data_id, data, None);
    normalizer.traverse(&selector.data_id, &selector.selections, &selector.variables, data)?;
    Ok(normalizer.payloads)
}

struct Normalizer<'a> {
    source: &'a mut RecordSource,
    fragments: &'a FragmentCatalog,
    payloads: Vec<HandleFieldPayload>,
}

impl<'a> Normalizer<'a> {
    fn traverse(
        &mut self,
        id: &str,
        selections: &[Selection],
        variables: &Variables,
        data: &Map<String, Value>,
    ) -> Result<()> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.normalize_scalar(id, field, variables, data),
                Selection::Linked(field) if field.plural => {
                    self.normalize_plural(id, field, variables, data)?
                }
                Selection::Linked(field) => self.normalize_linked(id, field, variables, data)?,
                Selection::Inline(fragment) => {
                    if self.typename_matches(id, fragment.type_condition.as_deref())? {
                        self.traverse(id, &fragment.selections, variables, data)?;
                    }
                }
                Selection::Spread(spread) => {
                    let fragments: &'a FragmentCatalog = self.fragments;
                    let fragment = fragments.get(&spread.fragment)?;
                    if self.typename_matches(id, fragment.type_condition.as_deref())? {
                        let child_variables = spread.child_variables(variables);
                        self.traverse(id, &fragment.selections, &child_variables, data)?;
                    }
                }
                Selection::Condition(condition) => {
                    if condition.passes(variables)? {
                        self.traverse(id, &condition.selections, variables, data)?;
                    }
                }
                Selection::Handle(handle) => self.emit_handle(id, handle, variables),
            }
        }
        Ok(())
    }

    fn normalize_scalar(
        &mut self,
        id: &str,
        field: &ScalarField,
        variables: &Variables,
        data: &Map<String, Value>,
    ) {
        let key = field.storage_key(variables);
        let value = match data.get(field.response_key()) {
            Some(value) => FieldValue::Scalar(value.clone()),
            None => FieldValue::Missing,
        };
        self.source.get_or_create(id).set(key, value);
    }

    fn normalize_linked(
        &mut self,
        id: &str,
        field: &LinkedField,
        variables: &Variables,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let key = field.storage_key(variables);
        match data.get(field.response_key()) {
            None => {
                self.source.get_or_create(id).set(key, FieldValue::Missing);
            }
            Some(Value::Null) => {
                self.source
                    .get_or_create(id)
                    .set(key, FieldValue::Scalar(Value::Null));
            }
            Some(Value::Object(child)) => {
                let child_id = child_id(id, &key, child, None);
                self.ensure_record(&child_id, child, field.concrete_type.as_deref());
                self.source
                    .get_or_create(id)
                    .set(key, FieldValue::Link(child_id.clone()));
                self.traverse(&child_id, &field.selections, variables, child)?;
            }
            Some(other) => {
                return Err(Error::Shape {
                    field: field.name.clone(),
                    reason: format!("expected an object, got {}", kind_of(other)),
                });
            }
        }
        Ok(())
    }

    fn normalize_plural(
        &mut self,
        id: &str,
        field: &LinkedField,
        variables: &Variables,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let key = field.storage_key(variables);
        match data.get(field.response_key()) {
            None => {
                self.source.get_or_create(id).set(key, FieldValue::Missing);
            }
            Some(Value::Null) => {
                self.source
                    .get_or_create(id)
                    .set(key, FieldValue::Scalar(Value::Null));
            }
            Some(Value::Array(items)) => {
                let mut ids = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    match item {
                        Value::Null => ids.push(None),
                        Value::Object(child) => {
                            let child_id = child_id(id, &key, child, Some(index));
                            self.ensure_record(&child_id, child, field.concrete_type.as_deref());
                            self.traverse(&child_id, &field.selections, variables, child)?;
                            ids.push(Some(child_id));
                        }
                        other => {
                            return Err(Error::Shape {
                                field: field.name.clone(),
                                reason: format!(
                                    "expected an object or null at index {index}, got {}",
                                    kind_of(other)
                                ),
                            });
                        }
                    }
                }
                self.source
                    .get_or_create(id)
                    .set(key, FieldValue::LinkList(ids));
            }
            Some(other) => {
                return Err(Error::Shape {
                    field: field.name.clone(),
                    reason: format!("expected an array, got {}", kind_of(other)),
                });
            }
        }
        Ok(())
    }

    fn emit_handle(&mut self, id: &str, handle: &HandleField, variables: &Variables) {
        let resolved = key::resolve_args(&handle.args, variables);
        self.payloads.push(HandleFieldPayload {
            args: Value::Object(Map::from_iter(resolved)),
            data_id: id.to_string(),
            field_key: handle.field_key(variables),
            handle: handle.handle.clone(),
            handle_key: handle.handle_key(variables),
        });
    }

    /// Create the record if needed and capture its type name from the
    /// payload, falling back to the field's static type.
    fn ensure_record(&mut self, id: &str, data: &Map<String, Value>, concrete_type: Option<&str>) {
        let record = self.source.get_or_create(id);
        if let Some(Value::String(typename)) = data.get("__typename") {
            record.typename = Some(typename.clone());
        } else if record.typename.is_none() {
            record.typename = concrete_type.map(str::to_string);
        }
    }

    fn typename_matches(&self, id: &str, condition: Option<&str>) -> Result<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        match self.source.get(id).and_then(|r| r.typename.as_deref()) {
            Some(typename) => Ok(typename == condition),
            None => Err(Error::MissingTypename(id.to_string())),
        }
    }
}

fn child_id(parent: &str, key: &str, data: &Map<String, Value>, index: Option<usize>) -> DataId {
    if let Some(Value::String(id)) = data.get("id") {
        return id.clone();
    }
    match index {
        Some(index) => format!("{parent}:{key}:{index}"),
        None => format!("{parent}:{key}"),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
