//! Retry cache.
//!
//! Responses are cached under `(session, request id)` for a bounded
//! retention window so a client re-sending the same request gets the stored
//! response instead of a second execution. A duplicate that arrives while the
//! original is still running waits for the original's response.

use super::Response;

use common::types::{RequestId, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

type CacheKey = (SessionId, RequestId);

enum CacheEntry {
    InFlight(watch::Receiver<Option<Response>>),
    Completed {
        response: Response,
        completed_at: Instant,
    },
}

/// Result of [`RequestCache::begin`].
pub enum Lookup<'a> {
    /// First sighting. Execute, then call [`InFlightGuard::complete`].
    Fresh(InFlightGuard<'a>),
    /// Already completed; replay this response.
    Replay(Response),
    /// Still running elsewhere; wait on the receiver.
    Pending(watch::Receiver<Option<Response>>),
}

/// Marks a request as in flight. Dropping it without completing removes the
/// marker and wakes waiters with no response.
pub struct InFlightGuard<'a> {
    cache: &'a RequestCache,
    key: Option<CacheKey>,
    sender: watch::Sender<Option<Response>>,
}

impl InFlightGuard<'_> {
    /// Store `response` and hand it to anyone waiting.
    pub fn complete(mut self, response: &Response) {
        if let Some(key) = self.key.take() {
            self.cache.entries.lock().insert(
                key,
                CacheEntry::Completed {
                    response: response.clone(),
                    completed_at: Instant::now(),
                },
            );
        }
        self.sender.send_replace(Some(response.clone()));
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.entries.lock().remove(&key);
        }
    }
}

/// Completed responses keyed by `(session, request id)`.
pub struct RequestCache {
    retention: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl RequestCache {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a request, marking it in flight if unseen.
    pub fn begin(&self, session: SessionId, id: RequestId) -> Lookup<'_> {
        let key = (session, id);
        let mut entries = self.entries.lock();

        match entries.get(&key) {
            Some(CacheEntry::Completed {
                response,
                completed_at,
            }) if completed_at.elapsed() <= self.retention => {
                return Lookup::Replay(response.clone());
            }
            Some(CacheEntry::InFlight(receiver)) => return Lookup::Pending(receiver.clone()),
            _ => {}
        }

        let (sender, receiver) = watch::channel(None);
        entries.insert(key.clone(), CacheEntry::InFlight(receiver));
        Lookup::Fresh(InFlightGuard {
            cache: self,
            key: Some(key),
            sender,
        })
    }

    /// Drop completed entries older than the retention window.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| match entry {
            CacheEntry::InFlight(_) => true,
            CacheEntry::Completed { completed_at, .. } => {
                now.saturating_duration_since(*completed_at) <= self.retention
            }
        });
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Wait for an in-flight original to finish.
///
/// Returns `None` if the original was abandoned without a response.
pub async fn wait_for(mut receiver: watch::Receiver<Option<Response>>) -> Option<Response> {
    receiver
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|response| response.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: i64) -> Response {
        Response::success(
            Some(RequestId::Number(1)),
            Some(SessionId::from("s")),
            json!({ "value": value }),
        )
    }

    fn key() -> (SessionId, RequestId) {
        (SessionId::from("s"), RequestId::Number(1))
    }

    #[tokio::test]
    async fn test_fresh_then_replay() {
        let cache = RequestCache::new(Duration::from_secs(30));
        let (s, id) = key();

        let Lookup::Fresh(guard) = cache.begin(s.clone(), id.clone()) else {
            unreachable!("first sighting must be fresh");
        };
        guard.complete(&response(7));

        match cache.begin(s, id) {
            Lookup::Replay(r) => assert_eq!(r, response(7)),
            _ => unreachable!("second sighting must replay"),
        };
    }

    #[tokio::test]
    async fn test_pending_waiter_gets_original_response() {
        let cache = RequestCache::new(Duration::from_secs(30));
        let (s, id) = key();

        let Lookup::Fresh(guard) = cache.begin(s.clone(), id.clone()) else {
            unreachable!();
        };
        let Lookup::Pending(receiver) = cache.begin(s, id) else {
            unreachable!("duplicate while in flight must wait");
        };

        let waiter = tokio::spawn(wait_for(receiver));
        guard.complete(&response(9));
        assert_eq!(waiter.await.unwrap(), Some(response(9)));
    }

    #[tokio::test]
    async fn test_abandoned_guard_releases_key() {
        let cache = RequestCache::new(Duration::from_secs(30));
        let (s, id) = key();

        let Lookup::Fresh(guard) = cache.begin(s.clone(), id.clone()) else {
            unreachable!();
        };
        let Lookup::Pending(receiver) = cache.begin(s.clone(), id.clone()) else {
            unreachable!();
        };
        drop(guard);

        assert_eq!(wait_for(receiver).await, None);
        assert!(matches!(cache.begin(s, id), Lookup::Fresh(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_retention() {
        let cache = RequestCache::new(Duration::from_secs(30));
        let (s, id) = key();
        if let Lookup::Fresh(guard) = cache.begin(s.clone(), id.clone()) {
            guard.complete(&response(1));
        }

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.evict_expired(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.evict_expired(Instant::now()), 1);
        assert!(cache.is_empty());
        assert!(matches!(cache.begin(s, id), Lookup::Fresh(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_not_replayed_before_eviction() {
        let cache = RequestCache::new(Duration::from_secs(5));
        let (s, id) = key();
        if let Lookup::Fresh(guard) = cache.begin(s.clone(), id.clone()) {
            guard.complete(&response(1));
        }

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(matches!(cache.begin(s, id), Lookup::Fresh(_)));
    }
}
