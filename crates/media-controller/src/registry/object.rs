//! Registry entry for a single media object.

use crate::engine::{MediaElement, ObjectKind, TypeDescriptor};

use chrono::{DateTime, Utc};
use common::types::ObjectId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A live media object: identity, place in the tree, and its engine element.
///
/// Name and tags are core-managed metadata, mutated through the built-in
/// operations without involving the engine.
pub struct MediaObject {
    pub id: ObjectId,
    pub descriptor: Arc<TypeDescriptor>,
    pub parent: Option<ObjectId>,
    pub element: Arc<dyn MediaElement>,
    pub created_at: DateTime<Utc>,
    name: Mutex<String>,
    tags: Mutex<BTreeMap<String, String>>,
}

impl MediaObject {
    #[must_use]
    pub fn new(
        id: ObjectId,
        descriptor: Arc<TypeDescriptor>,
        parent: Option<ObjectId>,
        element: Arc<dyn MediaElement>,
    ) -> Self {
        let name = id.to_string();
        Self {
            id,
            descriptor,
            parent,
            element,
            created_at: Utc::now(),
            name: Mutex::new(name),
            tags: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.descriptor.kind
    }

    /// Display name. Defaults to the object id.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn add_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.lock().insert(key.into(), value.into());
    }

    /// Returns whether the tag was present.
    pub fn remove_tag(&self, key: &str) -> bool {
        self.tags.lock().remove(key).is_some()
    }

    #[must_use]
    pub fn tag(&self, key: &str) -> Option<String> {
        self.tags.lock().get(key).cloned()
    }

    /// All tags, ordered by key.
    #[must_use]
    pub fn tags(&self) -> Vec<(String, String)> {
        self.tags
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl fmt::Debug for MediaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaObject")
            .field("id", &self.id)
            .field("type", &self.descriptor.qualified_name)
            .field("parent", &self.parent)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
