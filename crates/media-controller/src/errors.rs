//! Media controller error types.
//!
//! Every failure is scoped to a single request and reported to the caller as
//! an [`ErrorBody`]. Internal details are logged server-side but not exposed
//! to clients.

use common::error::{ErrorBody, ErrorCode};
use common::types::{ObjectId, SessionId, SubscriptionId};
use serde_json::{json, Value};
use thiserror::Error;

/// Request-scoped error raised by the core.
///
/// Maps to wire `ErrorCode` values:
/// - `MediaObjectNotFound`, `WrongObjectType`: `MEDIA_OBJECT_NOT_FOUND`
/// - `InvalidSession`: `INVALID_SESSION`
/// - `NotEnoughResources`: `NOT_ENOUGH_RESOURCES`
/// - `Engine`: the engine's own code, unchanged
/// - `Internal`: `INTERNAL_ERROR`
#[derive(Debug, Error)]
pub enum CoreError {
    /// Addressed object is not in the registry.
    #[error("Media object not found: {0}")]
    MediaObjectNotFound(ObjectId),

    /// Object exists but is not of the requested kind.
    #[error("Media object {id} is not a {expected}")]
    WrongObjectType { id: ObjectId, expected: String },

    /// Session does not exist (or has already been closed).
    #[error("Invalid session: {0}")]
    InvalidSession(SessionId),

    /// Admission control rejected a construction.
    #[error("Not enough resources: usage {usage:.3} exceeds limit {limit:.3}")]
    NotEnoughResources { usage: f64, limit: f64 },

    /// Unknown subscription for the addressed object.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// `newref:N` did not name a completed create in the same transaction.
    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    /// Malformed operation or parameters.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Unknown top-level method.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Constructor requested for a type tag that is not registered.
    #[error("Unknown object type: {0}")]
    UnknownType(String),

    /// Error surfaced by the media engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns the wire `ErrorCode` for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CoreError::MediaObjectNotFound(_) | CoreError::WrongObjectType { .. } => {
                ErrorCode::MediaObjectNotFound
            }
            CoreError::InvalidSession(_) => ErrorCode::InvalidSession,
            CoreError::NotEnoughResources { .. } => ErrorCode::NotEnoughResources,
            CoreError::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
            CoreError::UnresolvedReference(_) => ErrorCode::UnresolvedReference,
            CoreError::InvalidParams(_) => ErrorCode::InvalidParams,
            CoreError::UnknownMethod(_) | CoreError::UnknownType(_) => ErrorCode::MethodNotFound,
            CoreError::Engine(e) => ErrorCode::Engine(e.code),
            CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoreError::Internal(_) => "An internal error occurred".to_string(),
            CoreError::Engine(e) => e.message.clone(),
            other => other.to_string(),
        }
    }

    /// Short label for metrics (bounded cardinality).
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CoreError::MediaObjectNotFound(_) | CoreError::WrongObjectType { .. } => "not_found",
            CoreError::InvalidSession(_) => "invalid_session",
            CoreError::NotEnoughResources { .. } => "not_enough_resources",
            CoreError::SubscriptionNotFound(_) => "subscription_not_found",
            CoreError::UnresolvedReference(_)
            | CoreError::InvalidParams(_)
            | CoreError::UnknownMethod(_)
            | CoreError::UnknownType(_) => "validation",
            CoreError::Engine(_) => "engine",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Convert into the wire error payload.
    #[must_use]
    pub fn to_error_body(&self) -> ErrorBody {
        let code = self.error_code();
        let data = match self {
            CoreError::Engine(e) => {
                let mut data = json!({ "type": e.kind });
                if let (Some(extra), Some(obj)) = (&e.data, data.as_object_mut()) {
                    obj.insert("details".to_string(), extra.clone());
                }
                data
            }
            _ => json!({ "type": code.as_str() }),
        };
        ErrorBody {
            code: code.code(),
            message: self.client_message(),
            data: Some(data),
        }
    }
}

/// Error raised by the media engine during `create` or `invoke`.
///
/// The core never interprets these beyond forwarding them; `code` and `kind`
/// reach the client exactly as the engine produced them.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    /// Numeric code chosen by the engine.
    pub code: i32,
    /// Symbolic error type chosen by the engine.
    pub kind: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    pub data: Option<Value>,
}

impl EngineError {
    pub const OPERATION_NOT_FOUND: i32 = 40105;
    pub const ILLEGAL_PARAM: i32 = 40107;

    /// Create a new engine error.
    #[must_use]
    pub fn new(code: i32, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Operation is not implemented by the element.
    #[must_use]
    pub fn unsupported_operation(type_name: &str, operation: &str) -> Self {
        Self::new(
            Self::OPERATION_NOT_FOUND,
            "MEDIA_OBJECT_OPERATION_NOT_FOUND",
            format!("{type_name} has no operation '{operation}'"),
        )
    }

    /// A parameter is missing or has the wrong shape.
    #[must_use]
    pub fn illegal_param(message: impl Into<String>) -> Self {
        Self::new(Self::ILLEGAL_PARAM, "MEDIA_OBJECT_ILLEGAL_PARAM_ERROR", message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            CoreError::MediaObjectNotFound(ObjectId::from("x")).error_code(),
            ErrorCode::MediaObjectNotFound
        );
        assert_eq!(
            CoreError::WrongObjectType {
                id: ObjectId::from("x"),
                expected: "MediaPipeline".to_string()
            }
            .error_code(),
            ErrorCode::MediaObjectNotFound
        );
        assert_eq!(
            CoreError::InvalidSession(SessionId::from("s")).error_code(),
            ErrorCode::InvalidSession
        );
        assert_eq!(
            CoreError::NotEnoughResources {
                usage: 0.9,
                limit: 0.8
            }
            .error_code(),
            ErrorCode::NotEnoughResources
        );
        assert_eq!(
            CoreError::UnknownType("Nope".to_string()).error_code(),
            ErrorCode::MethodNotFound
        );
        assert_eq!(
            CoreError::Internal("boom".to_string()).error_code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn test_engine_error_passes_through_verbatim() {
        let engine = EngineError::new(40210, "SDP_PARSE_ERROR", "bad offer")
            .with_data(json!({"line": 3}));
        let err = CoreError::from(engine);
        let body = err.to_error_body();

        assert_eq!(body.code, 40210);
        assert_eq!(body.message, "bad offer");
        let data = body.data.unwrap();
        assert_eq!(data["type"], "SDP_PARSE_ERROR");
        assert_eq!(data["details"]["line"], 3);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CoreError::Internal("lock poisoned at registry.rs:42".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert!(!err.to_error_body().message.contains("registry.rs"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", CoreError::MediaObjectNotFound(ObjectId::from("abc"))),
            "Media object not found: abc"
        );
        assert_eq!(
            format!(
                "{}",
                CoreError::NotEnoughResources {
                    usage: 0.95,
                    limit: 0.8
                }
            ),
            "Not enough resources: usage 0.950 exceeds limit 0.800"
        );
    }
}
