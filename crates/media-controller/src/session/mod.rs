//! Session table.
//!
//! Tracks every live session, the objects each one references, and the
//! reverse index from object to referencing sessions. The reverse index is
//! what the garbage collector consults to decide reachability.
//!
//! A reference is either [`RefStrength::Strong`] (created or `ref`'d) or
//! [`RefStrength::Touched`] (merely addressed). Strong supersedes touched and
//! is never downgraded by a later touch.

pub mod gc;

pub use gc::{CloseKind, GarbageCollector, SessionClosure};

use chrono::{DateTime, Utc};
use common::types::{ObjectId, SessionId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// How strongly a session holds an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefStrength {
    /// Addressed by an invoke/describe/subscribe. Non-owning.
    Touched,
    /// Created or explicitly `ref`'d. Owning.
    Strong,
}

impl RefStrength {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RefStrength::Touched => "touched",
            RefStrength::Strong => "strong",
        }
    }
}

/// One session's bookkeeping.
#[derive(Debug)]
pub struct SessionEntry {
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    in_flight: usize,
    references: HashMap<ObjectId, RefStrength>,
}

impl SessionEntry {
    fn new(now: Instant) -> Self {
        Self {
            created_at: Utc::now(),
            last_activity: now,
            in_flight: 0,
            references: HashMap::new(),
        }
    }

    /// Whether the session has been quiet for longer than `ttl`.
    #[must_use]
    pub fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        self.in_flight == 0 && now.saturating_duration_since(self.last_activity) > ttl
    }
}

/// Session table contents. Reachable through [`SessionTable::lock`].
#[derive(Debug, Default)]
pub struct SessionTableInner {
    sessions: HashMap<SessionId, SessionEntry>,
    holders: HashMap<ObjectId, HashMap<SessionId, RefStrength>>,
}

impl SessionTableInner {
    /// Create the session if it does not exist. Returns true if created.
    pub fn ensure_session(&mut self, session: &SessionId) -> bool {
        if self.sessions.contains_key(session) {
            return false;
        }
        self.sessions
            .insert(session.clone(), SessionEntry::new(Instant::now()));
        true
    }

    #[must_use]
    pub fn contains(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    /// Reset the idle timer. Returns false if the session is unknown.
    pub fn record_activity(&mut self, session: &SessionId) -> bool {
        match self.sessions.get_mut(session) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Mark a request as running for `session`, creating the session if
    /// needed. Returns true if the session was created.
    pub fn enter(&mut self, session: &SessionId) -> bool {
        let created = self.ensure_session(session);
        if let Some(entry) = self.sessions.get_mut(session) {
            entry.in_flight += 1;
            entry.last_activity = Instant::now();
        }
        created
    }

    /// Mark a request for `session` as finished.
    pub fn leave(&mut self, session: &SessionId) {
        if let Some(entry) = self.sessions.get_mut(session) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            entry.last_activity = Instant::now();
        }
    }

    /// Record or upgrade a reference. Creates the session if needed.
    pub fn touch(&mut self, session: &SessionId, object: &ObjectId, strength: RefStrength) {
        self.ensure_session(session);
        let Some(entry) = self.sessions.get_mut(session) else {
            return;
        };
        let current = entry
            .references
            .entry(object.clone())
            .or_insert(strength);
        *current = (*current).max(strength);
        let upgraded = *current;

        self.holders
            .entry(object.clone())
            .or_default()
            .insert(session.clone(), upgraded);
    }

    /// Drop `session`'s reference to `object`, whatever its strength.
    pub fn drop_reference(&mut self, session: &SessionId, object: &ObjectId) -> Option<RefStrength> {
        let strength = self
            .sessions
            .get_mut(session)
            .and_then(|entry| entry.references.remove(object))?;
        if let Some(holders) = self.holders.get_mut(object) {
            holders.remove(session);
            if holders.is_empty() {
                self.holders.remove(object);
            }
        }
        Some(strength)
    }

    /// Remove a session and every reference it holds.
    ///
    /// Returns the references the session held, or `None` if unknown.
    pub fn remove_session(&mut self, session: &SessionId) -> Option<Vec<(ObjectId, RefStrength)>> {
        let entry = self.sessions.remove(session)?;
        let mut references: Vec<(ObjectId, RefStrength)> = entry.references.into_iter().collect();
        references.sort();
        for (object, _) in &references {
            if let Some(holders) = self.holders.get_mut(object) {
                holders.remove(session);
                if holders.is_empty() {
                    self.holders.remove(object);
                }
            }
        }
        Some(references)
    }

    /// Sessions referencing `object` and how strongly.
    #[must_use]
    pub fn holders_of(&self, object: &ObjectId) -> Vec<(SessionId, RefStrength)> {
        let mut holders: Vec<(SessionId, RefStrength)> = self
            .holders
            .get(object)
            .map(|h| h.iter().map(|(s, r)| (s.clone(), *r)).collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }

    #[must_use]
    pub fn has_references(&self, object: &ObjectId) -> bool {
        self.holders.get(object).is_some_and(|h| !h.is_empty())
    }

    #[must_use]
    pub fn has_strong_reference(&self, object: &ObjectId) -> bool {
        self.holders
            .get(object)
            .is_some_and(|h| h.values().any(|r| *r == RefStrength::Strong))
    }

    /// Forget `object` in every session. Called once the object is gone.
    pub fn purge_object(&mut self, object: &ObjectId) {
        if let Some(holders) = self.holders.remove(object) {
            for session in holders.keys() {
                if let Some(entry) = self.sessions.get_mut(session) {
                    entry.references.remove(object);
                }
            }
        }
    }

    /// References held by `session`, ordered by object id.
    #[must_use]
    pub fn references_of(&self, session: &SessionId) -> Vec<(ObjectId, RefStrength)> {
        let mut refs: Vec<(ObjectId, RefStrength)> = self
            .sessions
            .get(session)
            .map(|e| e.references.iter().map(|(o, r)| (o.clone(), *r)).collect())
            .unwrap_or_default();
        refs.sort();
        refs
    }

    #[must_use]
    pub fn get(&self, session: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(session)
    }

    /// Sessions idle for longer than `ttl` with no request in flight.
    #[must_use]
    pub fn idle_sessions(&self, now: Instant, ttl: Duration) -> Vec<SessionId> {
        let mut idle: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.is_idle(now, ttl))
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();
        idle
    }

    /// Ids of every session.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Shared, lock-guarded session table.
///
/// When taken together with the registry lock, this lock is always second.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: Mutex<SessionTableInner>,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionTableInner> {
        self.inner.lock()
    }

    pub fn touch(&self, session: &SessionId, object: &ObjectId, strength: RefStrength) {
        self.inner.lock().touch(session, object, strength);
    }

    /// Reset the idle timer. Returns false if the session is unknown.
    pub fn keep_alive(&self, session: &SessionId) -> bool {
        self.inner.lock().record_activity(session)
    }

    #[must_use]
    pub fn contains(&self, session: &SessionId) -> bool {
        self.inner.lock().contains(session)
    }

    #[must_use]
    pub fn holders_of(&self, object: &ObjectId) -> Vec<(SessionId, RefStrength)> {
        self.inner.lock().holders_of(object)
    }

    #[must_use]
    pub fn references_of(&self, session: &SessionId) -> Vec<(ObjectId, RefStrength)> {
        self.inner.lock().references_of(session)
    }

    #[must_use]
    pub fn idle_sessions(&self, now: Instant, ttl: Duration) -> Vec<SessionId> {
        self.inner.lock().idle_sessions(now, ttl)
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().session_ids()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, SessionId, ObjectId) {
        (
            SessionId::from("s1"),
            SessionId::from("s2"),
            ObjectId::from("obj"),
        )
    }

    #[test]
    fn test_strong_is_never_downgraded() {
        let table = SessionTable::new();
        let (s1, _, obj) = ids();

        table.touch(&s1, &obj, RefStrength::Strong);
        table.touch(&s1, &obj, RefStrength::Touched);

        assert_eq!(table.references_of(&s1), vec![(obj.clone(), RefStrength::Strong)]);
        assert_eq!(table.holders_of(&obj), vec![(s1, RefStrength::Strong)]);
    }

    #[test]
    fn test_touch_upgrades_to_strong() {
        let table = SessionTable::new();
        let (s1, _, obj) = ids();

        table.touch(&s1, &obj, RefStrength::Touched);
        table.touch(&s1, &obj, RefStrength::Strong);

        assert_eq!(table.holders_of(&obj), vec![(s1, RefStrength::Strong)]);
    }

    #[test]
    fn test_remove_session_clears_reverse_index() {
        let table = SessionTable::new();
        let (s1, s2, obj) = ids();
        table.touch(&s1, &obj, RefStrength::Strong);
        table.touch(&s2, &obj, RefStrength::Touched);

        let refs = table.lock().remove_session(&s1).unwrap();
        assert_eq!(refs, vec![(obj.clone(), RefStrength::Strong)]);
        assert_eq!(table.holders_of(&obj), vec![(s2.clone(), RefStrength::Touched)]);
        assert!(!table.lock().has_strong_reference(&obj));
        assert!(table.lock().remove_session(&s1).is_none());
    }

    #[test]
    fn test_drop_reference_and_purge() {
        let table = SessionTable::new();
        let (s1, s2, obj) = ids();
        table.touch(&s1, &obj, RefStrength::Strong);
        table.touch(&s2, &obj, RefStrength::Strong);

        let mut inner = table.lock();
        assert_eq!(inner.drop_reference(&s1, &obj), Some(RefStrength::Strong));
        assert_eq!(inner.drop_reference(&s1, &obj), None);
        assert!(inner.has_references(&obj));

        inner.purge_object(&obj);
        assert!(!inner.has_references(&obj));
        assert!(inner.references_of(&s2).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sessions_respect_ttl_and_in_flight() {
        let table = SessionTable::new();
        let (s1, s2, _) = ids();
        let ttl = Duration::from_secs(30);

        table.lock().ensure_session(&s1);
        table.lock().enter(&s2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(table.idle_sessions(Instant::now(), ttl), vec![s1.clone()]);

        table.lock().leave(&s2);
        assert_eq!(table.idle_sessions(Instant::now(), ttl), vec![s1.clone()]);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(table.idle_sessions(Instant::now(), ttl), vec![s1, s2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_resets_idle_timer() {
        let table = SessionTable::new();
        let (s1, s2, _) = ids();
        table.lock().ensure_session(&s1);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(table.keep_alive(&s1));
        assert!(!table.keep_alive(&s2));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(table
            .idle_sessions(Instant::now(), Duration::from_secs(30))
            .is_empty());
    }
}
