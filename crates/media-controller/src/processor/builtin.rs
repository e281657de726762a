//! Operations answered by the core from registry metadata.
//!
//! These never reach the engine.

use crate::errors::CoreError;
use crate::registry::{MediaObject, Registry};

use serde_json::{json, Value};

fn string_param(operation: &str, params: &Value, name: &str) -> Result<String, CoreError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CoreError::InvalidParams(format!("{operation}: missing '{name}'")))
}

/// Run `operation` if it is a built-in. `None` means forward to the engine.
pub(crate) fn invoke(
    registry: &Registry,
    object: &MediaObject,
    operation: &str,
    params: &Value,
) -> Option<Result<Value, CoreError>> {
    let result = match operation {
        "getName" => Ok(json!(object.name())),
        "setName" => string_param(operation, params, "name").map(|name| {
            object.set_name(name);
            Value::Null
        }),
        "getChildren" => Ok(json!(registry.children_of(&object.id))),
        "getParent" => Ok(json!(object.parent)),
        "getMediaPipeline" => registry.root_of(&object.id).map(|root| json!(root)),
        "getCreationTime" => Ok(json!(object.created_at.timestamp())),
        "addTag" => string_param(operation, params, "key").and_then(|key| {
            let value = string_param(operation, params, "value")?;
            object.add_tag(key, value);
            Ok(Value::Null)
        }),
        "removeTag" => string_param(operation, params, "key").map(|key| {
            object.remove_tag(&key);
            Value::Null
        }),
        "getTag" => string_param(operation, params, "key").and_then(|key| {
            object
                .tag(&key)
                .map(|value| json!(value))
                .ok_or_else(|| CoreError::InvalidParams(format!("getTag: no tag '{key}'")))
        }),
        "getTags" => Ok(Value::Array(
            object
                .tags()
                .into_iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect(),
        )),
        _ => return None,
    };
    Some(result)
}
