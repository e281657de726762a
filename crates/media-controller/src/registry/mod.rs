//! Object registry.
//!
//! Owns every live [`MediaObject`] and the parent/child tree between them.
//! All other components refer to objects by [`ObjectId`] only.
//!
//! # Locking
//!
//! The registry is guarded by one short synchronous lock. Multi-step updates
//! that must be atomic together with the session table take
//! [`Registry::lock`] first and the session table second; that order is used
//! everywhere. The lock is never held across an `.await`.

mod object;

pub use object::MediaObject;

use crate::engine::{MediaElement, ObjectKind};
use crate::errors::CoreError;

use common::types::ObjectId;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registry contents. Reachable through [`Registry::lock`].
#[derive(Debug, Default)]
pub struct RegistryInner {
    objects: HashMap<ObjectId, Arc<MediaObject>>,
    children: HashMap<ObjectId, BTreeSet<ObjectId>>,
    live: Arc<AtomicUsize>,
}

impl RegistryInner {
    /// Insert an object. Its parent, if any, must already be present.
    pub fn put(&mut self, object: MediaObject) -> Result<Arc<MediaObject>, CoreError> {
        if self.objects.contains_key(&object.id) {
            return Err(CoreError::Internal(format!(
                "object id {} registered twice",
                object.id
            )));
        }
        if let Some(parent) = &object.parent {
            if !self.objects.contains_key(parent) {
                return Err(CoreError::MediaObjectNotFound(parent.clone()));
            }
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(object.id.clone());
        }

        let object = Arc::new(object);
        self.objects.insert(object.id.clone(), Arc::clone(&object));
        self.live.store(self.objects.len(), Ordering::Relaxed);
        Ok(object)
    }

    pub fn get(&self, id: &ObjectId) -> Result<Arc<MediaObject>, CoreError> {
        self.objects
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::MediaObjectNotFound(id.clone()))
    }

    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    #[must_use]
    pub fn has_children(&self, id: &ObjectId) -> bool {
        self.children.get(id).is_some_and(|c| !c.is_empty())
    }

    /// Direct children, ordered by id.
    #[must_use]
    pub fn children_of(&self, id: &ObjectId) -> Vec<ObjectId> {
        self.children
            .get(id)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ancestors of `id`, nearest first. Empty for roots and unknown ids.
    #[must_use]
    pub fn ancestors(&self, id: &ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut current = self.objects.get(id).and_then(|o| o.parent.clone());
        while let Some(parent) = current {
            current = self.objects.get(&parent).and_then(|o| o.parent.clone());
            out.push(parent);
        }
        out
    }

    /// Every descendant of `id`, children before grandchildren.
    #[must_use]
    pub fn descendants(&self, id: &ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut frontier = self.children_of(id);
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for child in frontier {
                next.extend(self.children_of(&child));
                out.push(child);
            }
            frontier = next;
        }
        out
    }

    /// Root of the tree containing `id`.
    pub fn root_of(&self, id: &ObjectId) -> Result<ObjectId, CoreError> {
        if !self.objects.contains_key(id) {
            return Err(CoreError::MediaObjectNotFound(id.clone()));
        }
        Ok(self.ancestors(id).pop().unwrap_or_else(|| id.clone()))
    }

    /// Remove `id` and its whole subtree.
    ///
    /// Returns the removed objects, descendants before their ancestors. An
    /// unknown id removes nothing.
    pub fn remove(&mut self, id: &ObjectId) -> Vec<Arc<MediaObject>> {
        if !self.objects.contains_key(id) {
            return Vec::new();
        }

        let mut order = self.descendants(id);
        order.reverse();
        order.push(id.clone());

        let mut removed = Vec::with_capacity(order.len());
        for victim in order {
            self.children.remove(&victim);
            if let Some(object) = self.objects.remove(&victim) {
                if let Some(parent) = &object.parent {
                    if let Some(siblings) = self.children.get_mut(parent) {
                        siblings.remove(&victim);
                        if siblings.is_empty() {
                            self.children.remove(parent);
                        }
                    }
                }
                removed.push(object);
            }
        }
        self.live.store(self.objects.len(), Ordering::Relaxed);
        removed
    }

    /// Remove every object, returning them leaves first.
    pub fn drain(&mut self) -> Vec<Arc<MediaObject>> {
        let mut removed = Vec::with_capacity(self.objects.len());
        for root in self.roots() {
            removed.extend(self.remove(&root));
        }
        removed
    }

    /// Every object, ordered by id.
    #[must_use]
    pub fn objects(&self) -> Vec<Arc<MediaObject>> {
        let mut objects: Vec<Arc<MediaObject>> = self.objects.values().cloned().collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects
    }

    /// Ids of every root object.
    #[must_use]
    pub fn roots(&self) -> Vec<ObjectId> {
        let mut roots: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|o| o.parent.is_none())
            .map(|o| o.id.clone())
            .collect();
        roots.sort();
        roots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Shared, lock-guarded object registry.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
    live: Arc<AtomicUsize>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        let live = Arc::new(AtomicUsize::new(0));
        Self {
            inner: Mutex::new(RegistryInner {
                live: Arc::clone(&live),
                ..RegistryInner::default()
            }),
            live,
        }
    }

    /// Take the registry lock for a multi-step update.
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock()
    }

    pub fn get(&self, id: &ObjectId) -> Result<Arc<MediaObject>, CoreError> {
        self.inner.lock().get(id)
    }

    /// Look up `id` and require it to be of `kind`.
    pub fn get_of_kind(
        &self,
        id: &ObjectId,
        kind: ObjectKind,
    ) -> Result<Arc<MediaObject>, CoreError> {
        let object = self.get(id)?;
        if object.kind() == kind {
            Ok(object)
        } else {
            Err(CoreError::WrongObjectType {
                id: id.clone(),
                expected: kind.to_string(),
            })
        }
    }

    /// Look up `id` and downcast its element to `T`.
    pub fn get_as<T: MediaElement>(&self, id: &ObjectId) -> Result<Arc<T>, CoreError> {
        let object = self.get(id)?;
        Arc::clone(&object.element)
            .into_any()
            .downcast::<T>()
            .map_err(|_| CoreError::WrongObjectType {
                id: id.clone(),
                expected: std::any::type_name::<T>().to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.inner.lock().contains(id)
    }

    #[must_use]
    pub fn children_of(&self, id: &ObjectId) -> Vec<ObjectId> {
        self.inner.lock().children_of(id)
    }

    pub fn parent_of(&self, id: &ObjectId) -> Result<Option<ObjectId>, CoreError> {
        Ok(self.get(id)?.parent.clone())
    }

    #[must_use]
    pub fn ancestors(&self, id: &ObjectId) -> Vec<ObjectId> {
        self.inner.lock().ancestors(id)
    }

    pub fn root_of(&self, id: &ObjectId) -> Result<ObjectId, CoreError> {
        self.inner.lock().root_of(id)
    }

    #[must_use]
    pub fn roots(&self) -> Vec<ObjectId> {
        self.inner.lock().roots()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Live object count, readable without the lock.
    #[must_use]
    pub fn live_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }
}
