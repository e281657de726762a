//! Forward references inside a transaction.
//!
//! Sub-operations may name objects created earlier in the same transaction
//! as `newref:N`, where `N` counts prior `create` sub-operations from zero.
//! Placeholders are substituted just before each sub-operation runs.

use crate::errors::CoreError;

use common::types::{parse_newref, ObjectId};
use serde_json::Value;

/// Ids produced by the creates of one transaction, in order.
///
/// A create that failed still takes its slot, so indices stay aligned with
/// what the client wrote; referring to it fails.
#[derive(Debug, Default)]
pub(crate) struct ForwardRefs {
    creates: Vec<Option<ObjectId>>,
}

impl ForwardRefs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_create(&mut self, created: Option<ObjectId>) {
        self.creates.push(created);
    }

    fn resolve(&self, placeholder: &str, index: usize) -> Result<ObjectId, CoreError> {
        self.creates
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| CoreError::UnresolvedReference(placeholder.to_string()))
    }

    /// Replace every `newref:N` string anywhere in `value`.
    pub(crate) fn substitute(&self, value: Value) -> Result<Value, CoreError> {
        Ok(match value {
            Value::String(s) => match parse_newref(&s) {
                Some(index) => Value::String(self.resolve(&s, index)?.to_string()),
                None => Value::String(s),
            },
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.substitute(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.substitute(v)?)))
                    .collect::<Result<_, CoreError>>()?,
            ),
            other => other,
        })
    }
}

/// Split a raw `{method, params}` sub-operation.
pub(crate) fn split_sub_operation(raw: Value) -> Result<(String, Value), CoreError> {
    let Value::Object(mut map) = raw else {
        return Err(CoreError::InvalidParams(
            "transaction operations must be objects".to_string(),
        ));
    };
    let method = match map.remove("method") {
        Some(Value::String(method)) => method,
        _ => {
            return Err(CoreError::InvalidParams(
                "transaction operation is missing 'method'".to_string(),
            ))
        }
    };
    let params = map.remove("params").unwrap_or(Value::Null);
    Ok((method, params))
}

/// Methods allowed inside a transaction.
pub(crate) fn allowed_in_transaction(method: &str) -> bool {
    matches!(
        method,
        "create" | "invoke" | "ref" | "unref" | "release" | "describe" | "subscribe" | "unsubscribe"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitutes_nested_placeholders() {
        let mut refs = ForwardRefs::new();
        refs.record_create(Some(ObjectId::from("pipe")));
        refs.record_create(Some(ObjectId::from("pipe/ep")));

        let out = refs
            .substitute(json!({
                "object": "newref:1",
                "operationParams": {"sinks": ["newref:0", "literal"], "n": 3}
            }))
            .unwrap();

        assert_eq!(out["object"], "pipe/ep");
        assert_eq!(out["operationParams"]["sinks"], json!(["pipe", "literal"]));
        assert_eq!(out["operationParams"]["n"], 3);
    }

    #[test]
    fn test_failed_create_keeps_its_slot() {
        let mut refs = ForwardRefs::new();
        refs.record_create(None);
        refs.record_create(Some(ObjectId::from("second")));

        assert_eq!(refs.substitute(json!("newref:1")).unwrap(), "second");
        assert!(matches!(
            refs.substitute(json!("newref:0")),
            Err(CoreError::UnresolvedReference(r)) if r == "newref:0"
        ));
        assert!(matches!(
            refs.substitute(json!({"x": "newref:7"})),
            Err(CoreError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_split_sub_operation() {
        let (method, params) = split_sub_operation(json!({"method": "ref", "params": {"object": "o"}}))
            .unwrap();
        assert_eq!(method, "ref");
        assert_eq!(params["object"], "o");

        assert!(split_sub_operation(json!({"params": {}})).is_err());
        assert!(split_sub_operation(json!("create")).is_err());
    }

    #[test]
    fn test_session_methods_are_not_allowed() {
        assert!(allowed_in_transaction("create"));
        assert!(!allowed_in_transaction("transaction"));
        assert!(!allowed_in_transaction("closeSession"));
    }
}
