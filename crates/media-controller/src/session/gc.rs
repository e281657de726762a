//! Reachability-based garbage collection.
//!
//! An object is reachable if some session references it or it has at least
//! one reachable child. Evaluation runs deepest first and takes the registry
//! and session locks per object, so a concurrent `ref` arriving mid-cascade
//! can still rescue an object before its deletion step.
//!
//! The collector only unlinks objects. Releasing engine elements and
//! subscriptions happens in the caller once no lock is held.

use super::{RefStrength, SessionTable};
use crate::errors::CoreError;
use crate::registry::{MediaObject, Registry};

use common::types::{ObjectId, SessionId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How a session is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Drop references and collect what became unreachable.
    Soft,
    /// Also destroy objects the session owned that others only touched.
    Forced,
    /// Soft close, skipped if the session turns out not to be idle.
    Idle { now: Instant, ttl: Duration },
}

/// Objects removed by a session close.
#[derive(Debug, Default)]
pub struct SessionClosure {
    /// Destroyed by the forced-release rule.
    pub forced: Vec<Arc<MediaObject>>,
    /// Collected as unreachable.
    pub collected: Vec<Arc<MediaObject>>,
}

impl SessionClosure {
    #[must_use]
    pub fn len(&self) -> usize {
        self.forced.len() + self.collected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forced.is_empty() && self.collected.is_empty()
    }
}

/// Borrowed view over the registry and session table.
pub struct GarbageCollector<'a> {
    registry: &'a Registry,
    sessions: &'a SessionTable,
}

impl<'a> GarbageCollector<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry, sessions: &'a SessionTable) -> Self {
        Self { registry, sessions }
    }

    /// Re-evaluate `candidates` and everything above them.
    ///
    /// Returns removed objects, children before parents.
    pub fn collect<I>(&self, candidates: I) -> Vec<Arc<MediaObject>>
    where
        I: IntoIterator<Item = ObjectId>,
    {
        // Depth comes from the registry's parent links, not from the id text.
        let mut pending: BTreeMap<ObjectId, usize> = BTreeMap::new();
        {
            let registry = self.registry.lock();
            for candidate in candidates {
                let ancestors = registry.ancestors(&candidate);
                let depth = ancestors.len();
                for (distance, ancestor) in ancestors.into_iter().enumerate() {
                    pending.insert(ancestor, depth.saturating_sub(distance + 1));
                }
                pending.insert(candidate, depth);
            }
        }

        let mut order: Vec<(ObjectId, usize)> = pending.into_iter().collect();
        order.sort_by(|(a, da), (b, db)| db.cmp(da).then_with(|| a.cmp(b)));

        let mut removed = Vec::new();
        for (id, _) in order {
            let mut registry = self.registry.lock();
            let mut sessions = self.sessions.lock();
            if !registry.contains(&id) || sessions.has_references(&id) || registry.has_children(&id)
            {
                continue;
            }
            for object in registry.remove(&id) {
                sessions.purge_object(&object.id);
                debug!(
                    target: "media.gc",
                    object_id = %object.id,
                    "Collected unreachable object"
                );
                removed.push(object);
            }
        }
        removed
    }

    /// Close `session`, dropping all of its references.
    ///
    /// Returns `Ok(None)` for [`CloseKind::Idle`] when the session saw
    /// activity since it was selected.
    pub fn close_session(
        &self,
        session: &SessionId,
        kind: CloseKind,
    ) -> Result<Option<SessionClosure>, CoreError> {
        let mut closure = SessionClosure::default();
        let mut candidates: Vec<ObjectId> = Vec::new();

        {
            let mut registry = self.registry.lock();
            let mut sessions = self.sessions.lock();

            if let CloseKind::Idle { now, ttl } = kind {
                match sessions.get(session) {
                    Some(entry) if entry.is_idle(now, ttl) => {}
                    Some(_) => return Ok(None),
                    None => return Err(CoreError::InvalidSession(session.clone())),
                }
            }

            let references = sessions
                .remove_session(session)
                .ok_or_else(|| CoreError::InvalidSession(session.clone()))?;

            if kind == CloseKind::Forced {
                let mut owned: Vec<&ObjectId> = references
                    .iter()
                    .filter(|(_, strength)| *strength == RefStrength::Strong)
                    .map(|(id, _)| id)
                    .collect();
                owned.sort_by_key(|id| registry.ancestors(id).len());

                for id in owned {
                    if !registry.contains(id) || sessions.has_strong_reference(id) {
                        continue;
                    }
                    let subtree_claimed = registry
                        .descendants(id)
                        .iter()
                        .any(|d| sessions.has_strong_reference(d));
                    if subtree_claimed {
                        continue;
                    }

                    let parent = registry.get(id).ok().and_then(|o| o.parent.clone());
                    for object in registry.remove(id) {
                        sessions.purge_object(&object.id);
                        closure.forced.push(object);
                    }
                    candidates.extend(parent);
                }
            }

            candidates.extend(references.into_iter().map(|(id, _)| id));
        }

        closure.collected = self.collect(candidates);

        debug!(
            target: "media.gc",
            session_id = %session,
            forced = closure.forced.len(),
            collected = closure.collected.len(),
            "Session closed"
        );
        Ok(Some(closure))
    }
}
