//! Storage key derivation.
//!
//! A storage key is the canonical string identity of a (field, arguments)
//! pair: `name(arg1:v1,arg2:v2)` with argument names sorted and values in
//! canonical JSON (object keys sorted, no whitespace). Two logically
//! equivalent argument sets always produce byte-identical keys, independent
//! of declaration order or where the values came from.

use crate::{
    ast::{Argument, ArgumentValue},
    StorageKey, Variables,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolve argument ASTs against variable bindings.
///
/// Arguments whose variable is unbound are treated as absent and dropped;
/// explicit nulls are kept.
pub fn resolve_args(args: &[Argument], variables: &Variables) -> BTreeMap<String, Value> {
    let mut resolved = BTreeMap::new();
    for arg in args {
        match &arg.value {
            ArgumentValue::Literal(value) => {
                resolved.insert(arg.name.clone(), value.clone());
            }
            ArgumentValue::Variable(name) => {
                if let Some(value) = variables.get(name) {
                    resolved.insert(arg.name.clone(), value.clone());
                }
            }
        }
    }
    resolved
}

/// Derive the storage key for a field occurrence.
pub fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> StorageKey {
    format_key(name, &resolve_args(args, variables))
}

/// Derive a storage key from already-literal arguments, for updater-facing
/// record proxies.
pub fn storage_key_literal(name: &str, args: &[(&str, Value)]) -> StorageKey {
    let resolved: BTreeMap<String, Value> = args
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    format_key(name, &resolved)
}

/// Derive the storage key a handler's output lives under.
///
/// Handle fields read and write through `__<key>_<handle>` (or `__<handle>`
/// when no key was given), with the same canonical argument suffix as plain
/// fields.
pub fn handle_storage_key(
    handle: &str,
    key: &str,
    args: &[Argument],
    variables: &Variables,
) -> StorageKey {
    let name = if key.is_empty() {
        format!("__{handle}")
    } else {
        format!("__{key}_{handle}")
    };
    format_key(&name, &resolve_args(args, variables))
}

pub(crate) fn format_key(name: &str, resolved: &BTreeMap<String, Value>) -> StorageKey {
    if resolved.is_empty() {
        return name.to_string();
    }
    let args = resolved
        .iter()
        .map(|(name, value)| format!("{}:{}", name, canonical_json(value)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}({args})")
}

/// Encode a JSON value canonically: object keys sorted, no whitespace.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{items}]")
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries = keys
                .iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String((*key).clone()),
                        canonical_json(&map[*key])
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{entries}}}")
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn no_vars() -> Variables {
        Variables::new()
    }

    #[test]
    fn bare_name_without_args() {
        assert_eq!(storage_key("name", &[], &no_vars()), "name");
    }

    #[test]
    fn args_sorted_lexicographically() {
        let a = storage_key(
            "friends",
            &[
                Argument::literal("first", json!(10)),
                Argument::literal("orderby", json!("name")),
            ],
            &no_vars(),
        );
        let b = storage_key(
            "friends",
            &[
                Argument::literal("orderby", json!("name")),
                Argument::literal("first", json!(10)),
            ],
            &no_vars(),
        );
        assert_eq!(a, "friends(first:10,orderby:\"name\")");
        assert_eq!(a, b);
    }

    #[test]
    fn variables_resolve_like_literals() {
        let mut variables = Variables::new();
        variables.insert("count".to_string(), json!(10));

        let from_var = storage_key(
            "friends",
            &[Argument::variable("first", "count")],
            &variables,
        );
        let from_literal = storage_key(
            "friends",
            &[Argument::literal("first", json!(10))],
            &no_vars(),
        );
        assert_eq!(from_var, from_literal);
    }

    #[test]
    fn unbound_variables_are_dropped() {
        let key = storage_key(
            "friends",
            &[
                Argument::literal("first", json!(10)),
                Argument::variable("orderby", "order"),
            ],
            &no_vars(),
        );
        assert_eq!(key, "friends(first:10)");

        let all_dropped = storage_key(
            "friends",
            &[Argument::variable("first", "count")],
            &no_vars(),
        );
        assert_eq!(all_dropped, "friends");
    }

    #[test]
    fn explicit_null_is_kept() {
        let key = storage_key(
            "friends",
            &[Argument::literal("after", Value::Null)],
            &no_vars(),
        );
        assert_eq!(key, "friends(after:null)");
    }

    #[test]
    fn nested_objects_are_canonical() {
        let a = canonical_json(&json!({"b": [1, 2], "a": {"y": 1, "x": 2}}));
        assert_eq!(a, r#"{"a":{"x":2,"y":1},"b":[1,2]}"#);
    }

    #[test]
    fn string_values_are_escaped() {
        let key = storage_key(
            "search",
            &[Argument::literal("text", json!("a \"quote\""))],
            &no_vars(),
        );
        assert_eq!(key, r#"search(text:"a \"quote\"")"#);
    }

    #[test]
    fn handle_keys() {
        let key = handle_storage_key(
            "connection",
            "Feed_stories",
            &[Argument::literal("first", json!(5))],
            &no_vars(),
        );
        assert_eq!(key, "__Feed_stories_connection(first:5)");

        let bare = handle_storage_key("viewer", "", &[], &no_vars());
        assert_eq!(bare, "__viewer");
    }

    #[test]
    fn literal_args_match_ast_args() {
        let from_ast = storage_key(
            "friends",
            &[
                Argument::literal("first", json!(10)),
                Argument::literal("orderby", json!("name")),
            ],
            &no_vars(),
        );
        let from_literal =
            storage_key_literal("friends", &[("orderby", json!("name")), ("first", json!(10))]);
        assert_eq!(from_ast, from_literal);
    }

    proptest! {
        #[test]
        fn prop_key_independent_of_arg_order(
            values in proptest::collection::btree_map("[a-e]", -100i64..100, 1..5)
        ) {
            let mut forward: Vec<Argument> = values
                .iter()
                .map(|(name, value)| Argument::literal(name.clone(), json!(value)))
                .collect();
            let key_sorted = storage_key("field", &forward, &no_vars());

            forward.reverse();
            let key_reversed = storage_key("field", &forward, &no_vars());

            prop_assert_eq!(key_sorted, key_reversed);
        }

        #[test]
        fn prop_variable_and_literal_agree(value in -1000i64..1000) {
            let mut variables = Variables::new();
            variables.insert("v".to_string(), json!(value));

            let via_variable = storage_key(
                "field",
                &[Argument::variable("arg", "v")],
                &variables,
            );
            let via_literal = storage_key(
                "field",
                &[Argument::literal("arg", json!(value))],
                &no_vars(),
            );
            prop_assert_eq!(via_variable, via_literal);
        }
    }
}
