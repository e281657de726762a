//! Identifier types shared by the core and its transports.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between a parent id and a child segment in an [`ObjectId`].
pub const OBJECT_PATH_SEPARATOR: char = '/';

/// Prefix marking a forward reference inside a transaction.
pub const NEWREF_PREFIX: &str = "newref:";

/// Unique identifier for a media object.
///
/// Root objects are `"{uuid}_{qualified_type}"`; children append a
/// `"/{uuid}_{qualified_type}"` segment to their parent's id. Type names may
/// themselves contain the separator, so ancestry is read from the registry,
/// never parsed out of the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Mint an id for a root object (no parent).
    #[must_use]
    pub fn new_root(qualified_type: &str) -> Self {
        Self(format!("{}_{qualified_type}", Uuid::new_v4()))
    }

    /// Mint an id for a child of `parent`.
    #[must_use]
    pub fn new_child(parent: &ObjectId, qualified_type: &str) -> Self {
        Self(format!(
            "{}{OBJECT_PATH_SEPARATOR}{}_{qualified_type}",
            parent.0,
            Uuid::new_v4()
        ))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client session token. Either supplied by the client or minted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a new random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier returned by each successful `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a new random subscription id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SubscriptionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-chosen request id (JSON-RPC style: number or string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::Text(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(s) => f.write_str(s),
        }
    }
}

/// Parse a `newref:N` placeholder, returning `N`.
#[must_use]
pub fn parse_newref(value: &str) -> Option<usize> {
    value.strip_prefix(NEWREF_PREFIX)?.parse().ok()
}
