//! Request model.
//!
//! A request is `{ id?, sessionId?, method, params? }`. `method` and `params`
//! are decoded into a typed [`Operation`] only when the request executes, so
//! unknown methods and malformed params become ordinary error responses.

use crate::errors::CoreError;

use common::types::{ObjectId, RequestId, SessionId, SubscriptionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One request as received from a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Client-chosen id. Requests without one are never cached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Session the request runs in. Minted by the server when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    /// Request in `session` with no id.
    #[must_use]
    pub fn new(session: SessionId, operation: Operation) -> Self {
        let (method, params) = operation.into_parts();
        Self {
            id: None,
            session_id: Some(session),
            method,
            params,
        }
    }

    /// Request without a session; the server mints one.
    #[must_use]
    pub fn anonymous(operation: Operation) -> Self {
        let (method, params) = operation.into_parts();
        Self {
            id: None,
            session_id: None,
            method,
            params,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Decode `method` and `params`.
    pub fn operation(&self) -> Result<Operation, CoreError> {
        Operation::parse(&self.method, self.params.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub constructor_params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeParams {
    pub object: ObjectId,
    pub operation: String,
    #[serde(default)]
    pub operation_params: Value,
}

/// Params of operations that address a single object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectParams {
    pub object: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    pub object: ObjectId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub transport_params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub object: ObjectId,
    pub subscription: SubscriptionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionParams {
    /// Raw `{method, params}` sub-operations, decoded one at a time after
    /// forward references are substituted.
    pub operations: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloseSessionParams {
    #[serde(default)]
    pub release: bool,
}

/// A decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create(CreateParams),
    Invoke(InvokeParams),
    Ref(ObjectParams),
    Unref(ObjectParams),
    Release(ObjectParams),
    Describe(ObjectParams),
    Subscribe(SubscribeParams),
    Unsubscribe(UnsubscribeParams),
    Transaction(TransactionParams),
    CloseSession(CloseSessionParams),
    KeepAlive,
    Connect,
    Ping,
}

fn decode<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, CoreError> {
    let params = if params.is_null() {
        Value::Object(Map::new())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| CoreError::InvalidParams(format!("{method}: {e}")))
}

fn encode<T: Serialize>(params: &T) -> Value {
    serde_json::to_value(params).unwrap_or(Value::Null)
}

impl Operation {
    /// Decode a wire method and its params.
    pub fn parse(method: &str, params: Value) -> Result<Self, CoreError> {
        Ok(match method {
            "create" => Operation::Create(decode(method, params)?),
            "invoke" => Operation::Invoke(decode(method, params)?),
            "ref" => Operation::Ref(decode(method, params)?),
            "unref" => Operation::Unref(decode(method, params)?),
            "release" => Operation::Release(decode(method, params)?),
            "describe" => Operation::Describe(decode(method, params)?),
            "subscribe" => Operation::Subscribe(decode(method, params)?),
            "unsubscribe" => Operation::Unsubscribe(decode(method, params)?),
            "transaction" => Operation::Transaction(decode(method, params)?),
            "closeSession" => Operation::CloseSession(decode(method, params)?),
            "keepAlive" => Operation::KeepAlive,
            "connect" => Operation::Connect,
            "ping" => Operation::Ping,
            other => return Err(CoreError::UnknownMethod(other.to_string())),
        })
    }

    /// Wire method name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Operation::Create(_) => "create",
            Operation::Invoke(_) => "invoke",
            Operation::Ref(_) => "ref",
            Operation::Unref(_) => "unref",
            Operation::Release(_) => "release",
            Operation::Describe(_) => "describe",
            Operation::Subscribe(_) => "subscribe",
            Operation::Unsubscribe(_) => "unsubscribe",
            Operation::Transaction(_) => "transaction",
            Operation::CloseSession(_) => "closeSession",
            Operation::KeepAlive => "keepAlive",
            Operation::Connect => "connect",
            Operation::Ping => "ping",
        }
    }

    /// Split into wire method and params.
    #[must_use]
    pub fn into_parts(self) -> (String, Value) {
        let method = self.method().to_string();
        let params = match &self {
            Operation::Create(p) => encode(p),
            Operation::Invoke(p) => encode(p),
            Operation::Ref(p)
            | Operation::Unref(p)
            | Operation::Release(p)
            | Operation::Describe(p) => encode(p),
            Operation::Subscribe(p) => encode(p),
            Operation::Unsubscribe(p) => encode(p),
            Operation::Transaction(p) => encode(p),
            Operation::CloseSession(p) => encode(p),
            Operation::KeepAlive | Operation::Connect | Operation::Ping => Value::Null,
        };
        (method, params)
    }

    /// `{method, params}` form used for transaction sub-operations.
    #[must_use]
    pub fn to_value(self) -> Value {
        let (method, params) = self.into_parts();
        if params.is_null() {
            json!({ "method": method })
        } else {
            json!({ "method": method, "params": params })
        }
    }

    #[must_use]
    pub fn create(type_name: &str, constructor_params: Value) -> Self {
        Operation::Create(CreateParams {
            type_name: type_name.to_string(),
            constructor_params,
        })
    }

    #[must_use]
    pub fn invoke(object: &ObjectId, operation: &str, operation_params: Value) -> Self {
        Operation::Invoke(InvokeParams {
            object: object.clone(),
            operation: operation.to_string(),
            operation_params,
        })
    }

    #[must_use]
    pub fn reference(object: &ObjectId) -> Self {
        Operation::Ref(ObjectParams {
            object: object.clone(),
        })
    }

    #[must_use]
    pub fn unref(object: &ObjectId) -> Self {
        Operation::Unref(ObjectParams {
            object: object.clone(),
        })
    }

    #[must_use]
    pub fn release(object: &ObjectId) -> Self {
        Operation::Release(ObjectParams {
            object: object.clone(),
        })
    }

    #[must_use]
    pub fn describe(object: &ObjectId) -> Self {
        Operation::Describe(ObjectParams {
            object: object.clone(),
        })
    }

    #[must_use]
    pub fn subscribe(object: &ObjectId, event_type: &str, transport_params: Value) -> Self {
        Operation::Subscribe(SubscribeParams {
            object: object.clone(),
            event_type: event_type.to_string(),
            transport_params,
        })
    }

    #[must_use]
    pub fn unsubscribe(object: &ObjectId, subscription: &SubscriptionId) -> Self {
        Operation::Unsubscribe(UnsubscribeParams {
            object: object.clone(),
            subscription: subscription.clone(),
        })
    }

    #[must_use]
    pub fn transaction(operations: Vec<Value>) -> Self {
        Operation::Transaction(TransactionParams { operations })
    }

    #[must_use]
    pub fn close_session(release: bool) -> Self {
        Operation::CloseSession(CloseSessionParams { release })
    }
}
