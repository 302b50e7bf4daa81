//! Completeness checking - can a selector be fulfilled from the source?
//!
//! The checker walks like the reader but only answers yes or no, short-
//! circuiting on the first gap. Registered missing-field handlers get a
//! chance to fill gaps before they count: the first handler of the matching
//! kind to return a value patches the source and the walk continues through
//! the substitute. Handlers are consulted for unknown data only; a record
//! the server reported as nonexistent is an answer, not a gap.

use crate::{
    ast::{FragmentCatalog, LinkedField, ScalarField, Selection, Selector},
    error::Result,
    DataId, Error, FieldValue, RecordSource, RecordSourceRead, RecordState, Variables,
};
use serde_json::Value;
use std::collections::HashSet;

/// A substitute supplier for data the cache is missing.
pub enum MissingFieldHandler {
    /// Supplies a scalar value for a missing scalar field.
    Scalar(Box<dyn Fn(&ScalarField, Option<&crate::Record>, &Variables) -> Option<Value>>),
    /// Supplies a record identity for a missing singular link.
    Linked(Box<dyn Fn(&LinkedField, Option<&crate::Record>, &Variables) -> Option<DataId>>),
    /// Supplies record identities for a missing plural link.
    PluralLinked(
        Box<dyn Fn(&LinkedField, Option<&crate::Record>, &Variables) -> Option<Vec<Option<DataId>>>>,
    ),
}

impl MissingFieldHandler {
    pub fn scalar(
        f: impl Fn(&ScalarField, Option<&crate::Record>, &Variables) -> Option<Value> + 'static,
    ) -> Self {
        Self::Scalar(Box::new(f))
    }

    pub fn linked(
        f: impl Fn(&LinkedField, Option<&crate::Record>, &Variables) -> Option<DataId> + 'static,
    ) -> Self {
        Self::Linked(Box::new(f))
    }

    pub fn plural_linked(
        f: impl Fn(&LinkedField, Option<&crate::Record>, &Variables) -> Option<Vec<Option<DataId>>>
            + 'static,
    ) -> Self {
        Self::PluralLinked(Box::new(f))
    }
}

/// Check whether `selector` can be read from `source` without missing data,
/// patching handler-supplied substitutes into the source along the way.
pub fn check(
    source: &mut RecordSource,
    fragments: &FragmentCatalog,
    selector: &Selector,
    handlers: &[MissingFieldHandler],
) -> Result<bool> {
    let mut checker = Checker {
        source,
        fragments,
        handlers,
        active_spreads: HashSet::new(),
    };
    checker.check_record(&selector.data_id, &selector.selections, &selector.variables)
}

struct Checker<'a> {
    source: &'a mut RecordSource,
    fragments: &'a FragmentCatalog,
    handlers: &'a [MissingFieldHandler],
    active_spreads: HashSet<(DataId, String)>,
}

impl<'a> Checker<'a> {
    fn check_record(
        &mut self,
        id: &str,
        selections: &[Selection],
        variables: &Variables,
    ) -> Result<bool> {
        match self.source.status(id) {
            RecordState::Unknown => Ok(false),
            RecordState::Nonexistent => Ok(true),
            RecordState::Existent => self.traverse(id, selections, variables),
        }
    }

    fn traverse(&mut self, id: &str, selections: &[Selection], variables: &Variables) -> Result<bool> {
        for selection in selections {
            let complete = match selection {
                Selection::Scalar(field) => self.check_scalar(id, field, variables)?,
                Selection::Linked(field) if field.plural => {
                    self.check_plural(id, field, variables)?
                }
                Selection::Linked(field) => self.check_linked(id, field, variables)?,
                Selection::Inline(fragment) => {
                    match self.typename_matches(id, fragment.type_condition.as_deref()) {
                        None => false,
                        Some(false) => true,
                        Some(true) => self.traverse(id, &fragment.selections, variables)?,
                    }
                }
                Selection::Spread(spread) => {
                    let fragments: &'a FragmentCatalog = self.fragments;
                    let fragment = fragments.get(&spread.fragment)?;
                    match self.typename_matches(id, fragment.type_condition.as_deref()) {
                        None => false,
                        Some(false) => true,
                        Some(true) => {
                            let guard = (id.to_string(), spread.fragment.clone());
                            if self.active_spreads.insert(guard.clone()) {
                                let child_variables = spread.child_variables(variables);
                                let complete =
                                    self.traverse(id, &fragment.selections, &child_variables)?;
                                self.active_spreads.remove(&guard);
                                complete
                            } else {
                                true
                            }
                        }
                    }
                }
                Selection::Condition(condition) => {
                    if condition.passes(variables)? {
                        self.traverse(id, &condition.selections, variables)?
                    } else {
                        true
                    }
                }
                Selection::Handle(handle) => {
                    let key = handle.handle_key(variables);
                    let existing = self.field_value(id, &key);
                    match (existing, &handle.selections) {
                        (None | Some(FieldValue::Missing), _) => false,
                        (Some(FieldValue::Scalar(_)), None) => true,
                        (Some(FieldValue::Link(child)), Some(selections)) => {
                            self.check_record(&child, selections, variables)?
                        }
                        (Some(FieldValue::LinkList(ids)), Some(selections)) => {
                            let mut complete = true;
                            for child in ids.iter().flatten() {
                                if !self.check_record(child, selections, variables)? {
                                    complete = false;
                                    break;
                                }
                            }
                            complete
                        }
                        _ => {
                            return Err(Error::UnexpectedFieldType {
                                id: id.to_string(),
                                field: handle.name.clone(),
                                expected: "a handle value",
                            });
                        }
                    }
                }
            };
            if !complete {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_scalar(&mut self, id: &str, field: &ScalarField, variables: &Variables) -> Result<bool> {
        let key = field.storage_key(variables);
        match self.field_value(id, &key) {
            Some(FieldValue::Scalar(_)) => Ok(true),
            Some(FieldValue::Missing) | None => {
                for handler in self.handlers {
                    if let MissingFieldHandler::Scalar(supply) = handler {
                        let answer = supply(field, self.source.get(id), variables);
                        if let Some(value) = answer {
                            self.source
                                .get_or_create(id)
                                .set(key, FieldValue::Scalar(value));
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            Some(_) => Err(Error::UnexpectedFieldType {
                id: id.to_string(),
                field: field.name.clone(),
                expected: "a scalar",
            }),
        }
    }

    fn check_linked(&mut self, id: &str, field: &LinkedField, variables: &Variables) -> Result<bool> {
        let key = field.storage_key(variables);
        match self.field_value(id, &key) {
            Some(FieldValue::Scalar(Value::Null)) => Ok(true),
            Some(FieldValue::Link(child)) => {
                self.check_record(&child, &field.selections, variables)
            }
            Some(FieldValue::Missing) | None => {
                for handler in self.handlers {
                    if let MissingFieldHandler::Linked(supply) = handler {
                        let answer = supply(field, self.source.get(id), variables);
                        if let Some(child) = answer {
                            self.source
                                .get_or_create(id)
                                .set(key, FieldValue::Link(child.clone()));
                            return self.check_record(&child, &field.selections, variables);
                        }
                    }
                }
                Ok(false)
            }
            Some(_) => Err(Error::UnexpectedFieldType {
                id: id.to_string(),
                field: field.name.clone(),
                expected: "a singular linked record",
            }),
        }
    }

    fn check_plural(&mut self, id: &str, field: &LinkedField, variables: &Variables) -> Result<bool> {
        let key = field.storage_key(variables);
        match self.field_value(id, &key) {
            Some(FieldValue::Scalar(Value::Null)) => Ok(true),
            Some(FieldValue::LinkList(ids)) => {
                for child in ids.iter().flatten() {
                    if !self.check_record(child, &field.selections, variables)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Some(FieldValue::Missing) | None => {
                for handler in self.handlers {
                    if let MissingFieldHandler::PluralLinked(supply) = handler {
                        let answer = supply(field, self.source.get(id), variables);
                        if let Some(ids) = answer {
                            self.source
                                .get_or_create(id)
                                .set(key, FieldValue::LinkList(ids.clone()));
                            for child in ids.iter().flatten() {
                                if !self.check_record(child, &field.selections, variables)? {
                                    return Ok(false);
                                }
                            }
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            Some(_) => Err(Error::UnexpectedFieldType {
                id: id.to_string(),
                field: field.name.clone(),
                expected: "a plural linked field",
            }),
        }
    }

    fn field_value(&self, id: &str, key: &str) -> Option<FieldValue> {
        self.source.get(id).and_then(|r| r.get(key)).cloned()
    }

    /// `None` means the record's type is unknown, so matching is impossible.
    fn typename_matches(&self, id: &str, condition: Option<&str>) -> Option<bool> {
        let Some(condition) = condition else {
            return Some(true);
        };
        self.source
            .get(id)
            .and_then(|r| r.typename.as_deref())
            .map(|typename| typename == condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Argument;
    use crate::normalize::normalize;
    use crate::Record;
    use serde_json::json;

    fn user_selector() -> Selector {
        Selector::root(
            vec![Selection::Linked(
                LinkedField::new(
                    "user",
                    vec![
                        Selection::Scalar(ScalarField::new("id")),
                        Selection::Scalar(ScalarField::new("name")),
                    ],
                )
                .with_args(vec![Argument::literal("id", json!("4"))]),
            )],
            Variables::new(),
        )
    }

    fn source_with(response: serde_json::Value) -> RecordSource {
        let mut source = RecordSource::new();
        normalize(&mut source, &FragmentCatalog::new(), &user_selector(), &response).unwrap();
        source
    }

    #[test]
    fn complete_data_checks_true() {
        let mut source = source_with(json!({"user": {"id": "4", "name": "Zuck", "__typename": "User"}}));
        let complete = check(&mut source, &FragmentCatalog::new(), &user_selector(), &[]).unwrap();
        assert!(complete);
    }

    #[test]
    fn missing_field_checks_false_without_handlers() {
        let mut source = source_with(json!({"user": {"id": "4", "__typename": "User"}}));
        let complete = check(&mut source, &FragmentCatalog::new(), &user_selector(), &[]).unwrap();
        assert!(!complete);
    }

    #[test]
    fn scalar_handler_patches_the_source() {
        let mut source = source_with(json!({"user": {"id": "4", "__typename": "User"}}));
        let handlers = vec![MissingFieldHandler::scalar(|field, _record, _vars| {
            (field.name == "name").then(|| json!("Zuck"))
        })];

        let complete =
            check(&mut source, &FragmentCatalog::new(), &user_selector(), &handlers).unwrap();

        assert!(complete);
        assert_eq!(
            source
                .get("4")
                .and_then(|r| r.get("name"))
                .and_then(FieldValue::as_scalar),
            Some(&json!("Zuck"))
        );
    }

    #[test]
    fn first_answering_handler_wins() {
        let mut source = source_with(json!({"user": {"id": "4", "__typename": "User"}}));
        let handlers = vec![
            MissingFieldHandler::scalar(|_, _, _| None),
            MissingFieldHandler::scalar(|_, _, _| Some(json!("first"))),
            MissingFieldHandler::scalar(|_, _, _| Some(json!("second"))),
        ];

        assert!(check(&mut source, &FragmentCatalog::new(), &user_selector(), &handlers).unwrap());
        assert_eq!(
            source
                .get("4")
                .and_then(|r| r.get("name"))
                .and_then(FieldValue::as_scalar),
            Some(&json!("first"))
        );
    }

    #[test]
    fn linked_handler_substitutes_an_id() {
        // the user record exists but the root link to it was never fetched
        let mut source = RecordSource::new();
        let mut user = Record::with_typename("4", "User");
        user.set("id", FieldValue::Scalar(json!("4")));
        user.set("name", FieldValue::Scalar(json!("Zuck")));
        source.set(user);
        source.get_or_create(crate::ROOT_ID);

        let handlers = vec![MissingFieldHandler::linked(|field, _record, vars| {
            let _ = vars;
            if field.name != "user" {
                return None;
            }
            field.args.iter().find_map(|arg| match &arg.value {
                crate::ast::ArgumentValue::Literal(Value::String(id)) if arg.name == "id" => {
                    Some(id.clone())
                }
                _ => None,
            })
        })];

        let complete =
            check(&mut source, &FragmentCatalog::new(), &user_selector(), &handlers).unwrap();

        assert!(complete);
        assert_eq!(
            source
                .get(crate::ROOT_ID)
                .and_then(|r| r.get("user(id:\"4\")"))
                .and_then(FieldValue::as_link),
            Some(&"4".to_string())
        );
    }

    #[test]
    fn substituted_records_are_checked_too() {
        // handler answers with an id that is itself unknown
        let mut source = RecordSource::new();
        source.get_or_create(crate::ROOT_ID);

        let handlers = vec![MissingFieldHandler::linked(|_, _, _| Some("ghost".to_string()))];
        let complete =
            check(&mut source, &FragmentCatalog::new(), &user_selector(), &handlers).unwrap();

        assert!(!complete);
    }

    #[test]
    fn nonexistent_records_are_complete_nulls() {
        let mut source = source_with(json!({"user": {"id": "4", "name": "Zuck", "__typename": "User"}}));
        source.delete("4");

        let complete = check(&mut source, &FragmentCatalog::new(), &user_selector(), &[]).unwrap();
        assert!(complete);
    }

    #[test]
    fn plural_handler_supplies_a_list() {
        let selector = Selector::root(
            vec![Selection::Linked(LinkedField::plural(
                "friends",
                vec![Selection::Scalar(ScalarField::new("id"))],
            ))],
            Variables::new(),
        );
        let mut source = RecordSource::new();
        source.get_or_create(crate::ROOT_ID);
        let mut friend = Record::with_typename("1", "User");
        friend.set("id", FieldValue::Scalar(json!("1")));
        source.set(friend);

        let handlers = vec![MissingFieldHandler::plural_linked(|field, _, _| {
            (field.name == "friends").then(|| vec![Some("1".to_string()), None])
        })];

        let complete = check(&mut source, &FragmentCatalog::new(), &selector, &handlers).unwrap();

        assert!(complete);
        assert_eq!(
            source
                .get(crate::ROOT_ID)
                .and_then(|r| r.get("friends"))
                .and_then(FieldValue::as_link_list),
            Some(&[Some("1".to_string()), None][..])
        );
    }
}
