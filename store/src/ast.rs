//! Selection AST consumed by the normalizer, reader, and checker.
//!
//! Nodes form a closed sum; the schema compiler that produces them is an
//! external collaborator, so the types here double as a small builder API
//! for constructing selections programmatically.

use crate::{error::Result, key, DataId, Error, StorageKey, TypeName, Variables, ROOT_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// An argument value: a literal, or a reference to an operation variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ArgumentValue {
    Literal(Value),
    Variable(String),
}

/// A named argument on a field or fragment spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub name: String,
    pub value: ArgumentValue,
}

impl Argument {
    /// An argument bound to a literal value.
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    /// An argument bound to an operation variable.
    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// A leaf field selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarField {
    pub name: String,
    pub alias: Option<String>,
    pub args: Vec<Argument>,
}

impl ScalarField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    /// The key this field occupies in response trees and read-out data.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn storage_key(&self, variables: &Variables) -> StorageKey {
        key::storage_key(&self.name, &self.args, variables)
    }
}

/// A field selection linking to one record, or to a list of records when
/// `plural` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedField {
    pub name: String,
    pub alias: Option<String>,
    pub args: Vec<Argument>,
    /// Statically known type of the linked records, when the field is not
    /// polymorphic.
    pub concrete_type: Option<TypeName>,
    pub plural: bool,
    pub selections: Vec<Selection>,
}

impl LinkedField {
    /// A singular linked field.
    pub fn new(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            concrete_type: None,
            plural: false,
            selections,
        }
    }

    /// A plural linked field.
    pub fn plural(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        let mut field = Self::new(name, selections);
        field.plural = true;
        field
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    pub fn with_concrete_type(mut self, typename: impl Into<TypeName>) -> Self {
        self.concrete_type = Some(typename.into());
        self
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn storage_key(&self, variables: &Variables) -> StorageKey {
        key::storage_key(&self.name, &self.args, variables)
    }
}

/// A reference to a named fragment.
///
/// Masked spreads are not inlined by the reader: they produce a fragment
/// pointer in the data so the subtree can be re-read independently by a
/// child consumer. The normalizer always inlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentSpread {
    pub fragment: String,
    pub args: Vec<Argument>,
    pub masked: bool,
}

impl FragmentSpread {
    /// An unmasked spread, inlined everywhere.
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            args: Vec::new(),
            masked: false,
        }
    }

    /// A masked spread: read as a fragment pointer.
    pub fn masked(fragment: impl Into<String>) -> Self {
        let mut spread = Self::new(fragment);
        spread.masked = true;
        spread
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    /// Variables visible inside the fragment: the parent's bindings with
    /// spread arguments rebinding their names.
    pub(crate) fn child_variables(&self, parent: &Variables) -> Variables {
        if self.args.is_empty() {
            return parent.clone();
        }
        let mut variables = parent.clone();
        for (name, value) in key::resolve_args(&self.args, parent) {
            variables.insert(name, value);
        }
        variables
    }
}

/// An inline fragment, entered only when the record's type matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    pub type_condition: Option<TypeName>,
    pub selections: Vec<Selection>,
}

impl InlineFragment {
    pub fn new(type_condition: impl Into<TypeName>, selections: Vec<Selection>) -> Self {
        Self {
            type_condition: Some(type_condition.into()),
            selections,
        }
    }
}

/// The guard of a condition directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ConditionValue {
    Literal(bool),
    Variable(String),
}

/// An `@include`/`@skip` condition around a group of selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The guard value for which the selections apply.
    pub passing_value: bool,
    pub value: ConditionValue,
    pub selections: Vec<Selection>,
}

impl Condition {
    /// `@include(if: $variable)`
    pub fn include_if(variable: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            passing_value: true,
            value: ConditionValue::Variable(variable.into()),
            selections,
        }
    }

    /// `@skip(if: $variable)`
    pub fn skip_if(variable: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            passing_value: false,
            value: ConditionValue::Variable(variable.into()),
            selections,
        }
    }

    pub(crate) fn passes(&self, variables: &Variables) -> Result<bool> {
        let value = match &self.value {
            ConditionValue::Literal(value) => *value,
            ConditionValue::Variable(name) => variables
                .get(name)
                .ok_or_else(|| Error::UnboundVariable(name.clone()))?
                .as_bool()
                .ok_or_else(|| Error::Shape {
                    field: format!("${name}"),
                    reason: "condition variable must be a boolean".into(),
                })?,
        };
        Ok(value == self.passing_value)
    }
}

/// A field whose population is deferred to a client-registered handler.
///
/// `selections: None` reads as a scalar, `Some` as a linked record. Reads
/// go through the handle storage key the handler writes under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleField {
    pub name: String,
    pub alias: Option<String>,
    pub args: Vec<Argument>,
    /// Name of the registered handler
    pub handle: String,
    /// Distinguishes multiple uses of one handler; may be empty
    pub key: String,
    pub selections: Option<Vec<Selection>>,
}

impl HandleField {
    /// A scalar handle field.
    pub fn scalar(
        name: impl Into<String>,
        handle: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            handle: handle.into(),
            key: key.into(),
            selections: None,
        }
    }

    /// A linked handle field.
    pub fn linked(
        name: impl Into<String>,
        handle: impl Into<String>,
        key: impl Into<String>,
        selections: Vec<Selection>,
    ) -> Self {
        let mut field = Self::scalar(name, handle, key);
        field.selections = Some(selections);
        field
    }

    pub fn with_args(mut self, args: Vec<Argument>) -> Self {
        self.args = args;
        self
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn handle_key(&self, variables: &Variables) -> StorageKey {
        key::handle_storage_key(&self.handle, &self.key, &self.args, variables)
    }

    pub(crate) fn field_key(&self, variables: &Variables) -> StorageKey {
        key::storage_key(&self.name, &self.args, variables)
    }
}

/// A selection node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Selection {
    Scalar(ScalarField),
    Linked(LinkedField),
    Spread(FragmentSpread),
    Inline(InlineFragment),
    Condition(Condition),
    Handle(HandleField),
}

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub name: String,
    pub type_condition: Option<TypeName>,
    pub selections: Vec<Selection>,
}

impl Fragment {
    pub fn new(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            type_condition: None,
            selections,
        }
    }

    pub fn on(mut self, type_condition: impl Into<TypeName>) -> Self {
        self.type_condition = Some(type_condition.into());
        self
    }
}

/// The set of fragment definitions spreads are resolved against.
#[derive(Debug, Clone, Default)]
pub struct FragmentCatalog {
    fragments: HashMap<String, Fragment>,
}

impl FragmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fragment under its own name, replacing any previous
    /// definition.
    pub fn register(&mut self, fragment: Fragment) {
        self.fragments.insert(fragment.name.clone(), fragment);
    }

    /// Look up a fragment; unresolved names are a caller contract violation.
    pub fn get(&self, name: &str) -> Result<&Fragment> {
        self.fragments
            .get(name)
            .ok_or_else(|| Error::UnknownFragment(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }
}

/// A readable/writable region of the graph: a root identity, the selections
/// that apply to it, and the variable bindings they close over.
#[derive(Debug, Clone)]
pub struct Selector {
    pub data_id: DataId,
    pub selections: Arc<Vec<Selection>>,
    pub variables: Variables,
    /// Name of the owning operation, when the selector was derived from one
    pub owner: Option<String>,
}

impl Selector {
    pub fn new(data_id: impl Into<DataId>, selections: Vec<Selection>, variables: Variables) -> Self {
        Self {
            data_id: data_id.into(),
            selections: Arc::new(selections),
            variables,
            owner: None,
        }
    }

    /// A selector rooted at the client root record.
    pub fn root(selections: Vec<Selection>, variables: Variables) -> Self {
        Self::new(ROOT_ID, selections, variables)
    }
}

/// A named operation bound to its variables, rooted at the client root.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub name: String,
    pub root: Selector,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>, selections: Vec<Selection>, variables: Variables) -> Self {
        let name = name.into();
        let mut root = Selector::root(selections, variables);
        root.owner = Some(name.clone());
        Self { name, root }
    }
}
