//! Response model.

use crate::errors::CoreError;

use common::error::ErrorBody;
use common::types::{RequestId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outcome of one request. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Session the request ran in, so stateless transports can persist it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    #[must_use]
    pub fn success(id: Option<RequestId>, session_id: Option<SessionId>, result: Value) -> Self {
        Self {
            id,
            session_id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Option<RequestId>, session_id: Option<SessionId>, error: &CoreError) -> Self {
        Self {
            id,
            session_id,
            result: None,
            error: Some(error.to_error_body()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Entry in a transaction's result list.
pub(crate) fn outcome_value(outcome: &Result<Value, CoreError>) -> Value {
    match outcome {
        Ok(result) => json!({ "result": result }),
        Err(e) => json!({ "error": e.to_error_body() }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::ObjectId;

    #[test]
    fn test_success_omits_error() {
        let response = Response::success(
            Some(RequestId::Number(1)),
            Some(SessionId::from("s")),
            json!({"value": "x"}),
        );
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["sessionId"], "s");
        assert_eq!(wire["result"]["value"], "x");
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn test_failure_carries_error_body() {
        let err = CoreError::MediaObjectNotFound(ObjectId::from("gone"));
        let response = Response::failure(None, None, &err);
        assert!(!response.is_success());

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["error"]["code"], 40101);
        assert_eq!(wire["error"]["data"]["type"], "MEDIA_OBJECT_NOT_FOUND");
        assert!(wire.get("result").is_none());
        assert!(wire.get("id").is_none());
    }

    #[test]
    fn test_outcome_value_shapes() {
        assert_eq!(outcome_value(&Ok(json!({}))), json!({"result": {}}));
        let err = outcome_value(&Err(CoreError::UnresolvedReference("newref:3".to_string())));
        assert_eq!(err["error"]["code"], 40402);
    }
}
