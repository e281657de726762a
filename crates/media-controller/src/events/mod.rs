//! Event dispatch.
//!
//! Subscriptions are many-to-one with handlers. A handler is keyed by
//! `(object, event type, session)`, or `(object, event type)` for broadcast
//! transports, and is shared by every subscription with that key. The
//! dispatcher only keeps a weak reference to each handler; the subscriptions
//! own it. Once the last subscription goes, the weak entry stops resolving
//! and is pruned.
//!
//! Each emitted event is delivered once per live handler, never once per
//! subscription.

mod handler;

pub use handler::{EventEmitter, EventHandler, EventHandlerFactory, HandlerScope, MediaEvent};

use crate::errors::CoreError;
use crate::observability::metrics;

use common::types::{ObjectId, SessionId, SubscriptionId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Key under which a handler is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub object: ObjectId,
    pub event_type: String,
    /// `None` for broadcast handlers.
    pub session: Option<SessionId>,
}

/// A transport handler shared by every subscription with the same key.
pub struct SharedHandler {
    key: HandlerKey,
    handler: Arc<dyn EventHandler>,
}

impl SharedHandler {
    #[must_use]
    pub fn key(&self) -> &HandlerKey {
        &self.key
    }
}

/// Strong handle to a shared handler. Holding one keeps the handler alive.
pub type HandlerRef = Arc<SharedHandler>;

/// One `subscribe` call.
#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub object: ObjectId,
    pub event_type: String,
    pub session: SessionId,
    handler: HandlerRef,
}

#[derive(Default)]
struct DispatcherState {
    factory: Option<Arc<dyn EventHandlerFactory>>,
    handlers: HashMap<HandlerKey, Weak<SharedHandler>>,
    by_source: HashMap<(ObjectId, String), HashSet<HandlerKey>>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

impl DispatcherState {
    /// Scope of the installed factory. Per-session until one is installed.
    fn scope(&self) -> HandlerScope {
        self.factory
            .as_ref()
            .map_or(HandlerScope::Session, |factory| factory.scope())
    }

    fn live_handler(&self, key: &HandlerKey) -> Option<HandlerRef> {
        self.handlers.get(key).and_then(Weak::upgrade)
    }

    fn install(&mut self, handler: &HandlerRef) {
        let key = handler.key.clone();
        self.by_source
            .entry((key.object.clone(), key.event_type.clone()))
            .or_default()
            .insert(key.clone());
        self.handlers.insert(key, Arc::downgrade(handler));
    }

    fn insert_subscription(&mut self, subscription: Subscription) {
        if self.live_handler(&subscription.handler.key).is_none() {
            self.install(&subscription.handler);
        }
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Drop weak entries whose handler is gone.
    fn prune(&mut self, keys: impl IntoIterator<Item = HandlerKey>) {
        for key in keys {
            let dead = self
                .handlers
                .get(&key)
                .is_some_and(|weak| weak.strong_count() == 0);
            if !dead {
                continue;
            }
            self.handlers.remove(&key);
            let source = (key.object.clone(), key.event_type.clone());
            if let Some(keys) = self.by_source.get_mut(&source) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.by_source.remove(&source);
                }
            }
        }
    }

    fn remove_where(&mut self, pred: impl Fn(&Subscription) -> bool) -> usize {
        let doomed: Vec<SubscriptionId> = self
            .subscriptions
            .values()
            .filter(|s| pred(s))
            .map(|s| s.id.clone())
            .collect();
        let mut keys = Vec::with_capacity(doomed.len());
        for id in &doomed {
            if let Some(subscription) = self.subscriptions.remove(id) {
                keys.push(subscription.handler.key.clone());
            }
        }
        self.prune(keys);
        doomed.len()
    }
}

/// Routes engine events to transport handlers.
#[derive(Default)]
pub struct EventDispatcher {
    state: Mutex<DispatcherState>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the transport's handler factory.
    pub fn set_factory(&self, factory: Arc<dyn EventHandlerFactory>) {
        self.state.lock().factory = Some(factory);
    }

    fn key_for(
        scope: HandlerScope,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
    ) -> HandlerKey {
        HandlerKey {
            object: object.clone(),
            event_type: event_type.to_string(),
            session: match scope {
                HandlerScope::Session => Some(session.clone()),
                HandlerScope::Broadcast => None,
            },
        }
    }

    /// Subscribe through the installed factory, reusing a live handler for
    /// the same key. Always returns a fresh subscription id.
    pub fn subscribe(
        &self,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
        transport_params: &Value,
    ) -> Result<SubscriptionId, CoreError> {
        let (factory, existing, key) = {
            let state = self.state.lock();
            let factory = state.factory.clone().ok_or_else(|| {
                CoreError::Internal("no event subscription handler installed".to_string())
            })?;
            let key = Self::key_for(factory.scope(), object, session, event_type);
            let existing = state.live_handler(&key);
            (factory, existing, key)
        };

        let handler = match existing {
            Some(handler) => handler,
            None => {
                let built = factory.build(object, session, event_type, transport_params)?;
                Arc::new(SharedHandler {
                    key: key.clone(),
                    handler: built,
                })
            }
        };

        let id = SubscriptionId::new();
        let mut state = self.state.lock();
        // Another subscribe may have installed a handler for this key while
        // ours was being built.
        let handler = state.live_handler(&key).unwrap_or(handler);
        state.insert_subscription(Subscription {
            id: id.clone(),
            object: object.clone(),
            event_type: event_type.to_string(),
            session: session.clone(),
            handler,
        });
        debug!(
            target: "media.events",
            object_id = %object,
            session_id = %session,
            event_type = %event_type,
            subscription_id = %id,
            "Subscription added"
        );
        Ok(id)
    }

    /// Attach a transport-supplied handler under a new subscription. A live
    /// handler already registered for the key takes precedence.
    ///
    /// The key follows the installed factory's scope, so a broadcast
    /// transport shares one handler per `(object, event type)`.
    pub fn connect_event_handler(
        &self,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut state = self.state.lock();
        let key = Self::key_for(state.scope(), object, session, event_type);
        let shared = state.live_handler(&key).unwrap_or_else(|| {
            Arc::new(SharedHandler {
                key: key.clone(),
                handler,
            })
        });
        state.insert_subscription(Subscription {
            id: id.clone(),
            object: object.clone(),
            event_type: event_type.to_string(),
            session: session.clone(),
            handler: shared,
        });
        id
    }

    /// Live handler for a key, if any. `session` is ignored under a
    /// broadcast factory.
    #[must_use]
    pub fn lookup_handler(
        &self,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
    ) -> Option<HandlerRef> {
        let state = self.state.lock();
        let key = Self::key_for(state.scope(), object, session, event_type);
        state.live_handler(&key)
    }

    /// Share an existing handler under a caller-chosen subscription id.
    pub fn register_event_handler(
        &self,
        object: &ObjectId,
        session: &SessionId,
        subscription: SubscriptionId,
        handler: HandlerRef,
    ) -> Result<(), CoreError> {
        if &handler.key.object != object {
            return Err(CoreError::InvalidParams(format!(
                "handler is bound to {}, not {object}",
                handler.key.object
            )));
        }
        let mut state = self.state.lock();
        if state.subscriptions.contains_key(&subscription) {
            return Err(CoreError::InvalidParams(format!(
                "subscription {subscription} already registered"
            )));
        }
        let event_type = handler.key.event_type.clone();
        state.insert_subscription(Subscription {
            id: subscription,
            object: object.clone(),
            event_type,
            session: session.clone(),
            handler,
        });
        Ok(())
    }

    /// Remove one subscription. The subscription must belong to `object`
    /// and `session`.
    pub fn unsubscribe(
        &self,
        object: &ObjectId,
        session: &SessionId,
        subscription: &SubscriptionId,
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let matches = state
            .subscriptions
            .get(subscription)
            .is_some_and(|s| &s.object == object && &s.session == session);
        if !matches {
            return Err(CoreError::SubscriptionNotFound(subscription.clone()));
        }
        state.remove_where(|s| &s.id == subscription);
        Ok(())
    }

    /// Remove every subscription owned by `session`.
    pub fn drop_session(&self, session: &SessionId) -> usize {
        self.state.lock().remove_where(|s| &s.session == session)
    }

    /// Remove every subscription on `object`.
    pub fn drop_object(&self, object: &ObjectId) -> usize {
        self.state.lock().remove_where(|s| &s.object == object)
    }

    /// Deliver `event` once to each live handler for its source.
    ///
    /// Handlers run outside the dispatcher lock. Returns deliveries made.
    pub fn dispatch(&self, event: &MediaEvent) -> usize {
        let targets: Vec<HandlerRef> = {
            let state = self.state.lock();
            state
                .by_source
                .get(&(event.object.clone(), event.event_type.clone()))
                .map(|keys| keys.iter().filter_map(|k| state.live_handler(k)).collect())
                .unwrap_or_default()
        };

        if targets.is_empty() {
            debug!(
                target: "media.events",
                object_id = %event.object,
                event_type = %event.event_type,
                "No subscribers for event"
            );
            return 0;
        }

        for target in &targets {
            target.handler.deliver(event);
        }
        metrics::record_events_delivered(targets.len());
        targets.len()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Handlers still referenced by at least one subscription.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        let state = self.state.lock();
        state
            .handlers
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Subscriptions on `object`.
    #[must_use]
    pub fn subscriptions_for(&self, object: &ObjectId) -> Vec<Subscription> {
        self.state
            .lock()
            .subscriptions
            .values()
            .filter(|s| &s.object == object)
            .cloned()
            .collect()
    }
}
