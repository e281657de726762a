//! Wire-level error codes shared by every transport.
//!
//! Transports re-encode these verbatim; engine-surfaced codes are carried
//! through as [`ErrorCode::Engine`] without translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Addressed media object does not exist (or has the wrong type).
    MediaObjectNotFound,
    /// Session does not exist.
    InvalidSession,
    /// Admission control rejected a construction.
    NotEnoughResources,
    /// Subscription id is unknown for the addressed object.
    SubscriptionNotFound,
    /// `newref:N` does not name a completed create in the transaction.
    UnresolvedReference,
    /// Malformed operation parameters.
    InvalidParams,
    /// Unknown method or object type.
    MethodNotFound,
    /// Unexpected failure inside the server.
    InternalError,
    /// Code surfaced by the media engine, passed through unchanged.
    Engine(i32),
}

impl ErrorCode {
    /// Every code owned by the core. Engines must pick codes outside this
    /// set.
    pub const CORE: [ErrorCode; 8] = [
        ErrorCode::MediaObjectNotFound,
        ErrorCode::InvalidSession,
        ErrorCode::NotEnoughResources,
        ErrorCode::SubscriptionNotFound,
        ErrorCode::UnresolvedReference,
        ErrorCode::InvalidParams,
        ErrorCode::MethodNotFound,
        ErrorCode::InternalError,
    ];

    /// Numeric code placed on the wire.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            ErrorCode::MediaObjectNotFound => 40101,
            ErrorCode::InvalidSession => 40102,
            ErrorCode::NotEnoughResources => 40103,
            ErrorCode::SubscriptionNotFound => 40401,
            ErrorCode::UnresolvedReference => 40402,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InternalError => -32603,
            ErrorCode::Engine(code) => *code,
        }
    }

    /// Symbolic name, carried in `ErrorBody::data.type`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MediaObjectNotFound => "MEDIA_OBJECT_NOT_FOUND",
            ErrorCode::InvalidSession => "INVALID_SESSION",
            ErrorCode::NotEnoughResources => "NOT_ENOUGH_RESOURCES",
            ErrorCode::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            ErrorCode::UnresolvedReference => "UNRESOLVED_REFERENCE",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Engine(_) => "ENGINE_ERROR",
        }
    }
}

/// Error payload of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_codes_pass_through() {
        assert_eq!(ErrorCode::Engine(40001).code(), 40001);
        assert_eq!(ErrorCode::Engine(-1).code(), -1);
    }

    #[test]
    fn test_domain_codes_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::CORE {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn test_error_body_omits_empty_data() {
        let body = ErrorBody {
            code: 40101,
            message: "Media object not found".to_string(),
            data: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("data"));
    }
}
