//! The core handle.
//!
//! One [`Core`] is built at startup and shared (`Arc<Core>`) with every
//! transport and background task. It owns the registry, session table,
//! event dispatcher, admission controller, type registry and request cache.
//! Request execution lives in [`crate::processor`].

use crate::admission::{AdmissionController, ObjectCountProbe, ResourceProbe};
use crate::config::{CoreConfig, DEFAULT_MAX_OBJECTS};
use crate::engine::{loopback, TypeRegistry};
use crate::errors::CoreError;
use crate::events::{EventDispatcher, EventHandler, EventHandlerFactory, HandlerRef, MediaEvent};
use crate::observability::metrics;
use crate::processor::RequestCache;
use crate::registry::{MediaObject, Registry};
use crate::session::{CloseKind, GarbageCollector, RefStrength, SessionTable};

use common::types::{ObjectId, SessionId, SubscriptionId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Builds a [`Core`].
pub struct CoreBuilder {
    config: CoreConfig,
    types: TypeRegistry,
    probe: Option<Arc<dyn ResourceProbe>>,
    object_capacity: usize,
}

impl CoreBuilder {
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            types: TypeRegistry::new(),
            probe: None,
            object_capacity: DEFAULT_MAX_OBJECTS,
        }
    }

    /// Replace the type registry.
    #[must_use]
    pub fn types(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    /// Register the in-memory loopback types on top of the current ones.
    #[must_use]
    pub fn with_loopback_types(mut self) -> Self {
        loopback::register_types(&mut self.types);
        self
    }

    /// Use `probe` for admission instead of the object-count probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Capacity of the default object-count probe.
    #[must_use]
    pub fn object_capacity(mut self, capacity: usize) -> Self {
        self.object_capacity = capacity;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Core> {
        let registry = Registry::new();
        let probe = self.probe.unwrap_or_else(|| {
            Arc::new(ObjectCountProbe::new(
                registry.live_counter(),
                self.object_capacity,
            ))
        });

        info!(
            target: "media.core",
            probe = probe.name(),
            resource_limit = self.config.resource_limit,
            types = self.types.type_names().len(),
            "Core initialized"
        );

        Arc::new(Core {
            admission: AdmissionController::new(probe, self.config.resource_limit),
            cache: RequestCache::new(self.config.request_cache_retention),
            config: self.config,
            registry,
            sessions: SessionTable::new(),
            dispatcher: Arc::new(EventDispatcher::new()),
            types: self.types,
        })
    }
}

/// Counts reported by `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoreStatus {
    pub objects: usize,
    pub sessions: usize,
    pub subscriptions: usize,
    pub handlers: usize,
}

/// One session's hold on an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderSnapshot {
    pub session_id: SessionId,
    pub strength: &'static str,
}

/// Diagnostic view of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    #[serde(rename = "type")]
    pub qualified_type: String,
    pub parent: Option<ObjectId>,
    pub children: Vec<ObjectId>,
    pub holders: Vec<HolderSnapshot>,
}

/// Media control-plane core.
pub struct Core {
    pub(crate) config: CoreConfig,
    pub(crate) registry: Registry,
    pub(crate) sessions: SessionTable,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) admission: AdmissionController,
    pub(crate) types: TypeRegistry,
    pub(crate) cache: RequestCache,
}

impl Core {
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Reset the idle timer of an existing session.
    pub fn keep_alive_session(&self, session: &SessionId) -> Result<(), CoreError> {
        if self.sessions.keep_alive(session) {
            Ok(())
        } else {
            Err(CoreError::InvalidSession(session.clone()))
        }
    }

    /// Establish `session`, or refresh it if it already exists.
    pub fn connect_session(&self, session: &SessionId) {
        let created = {
            let mut sessions = self.sessions.lock();
            let created = sessions.ensure_session(session);
            sessions.record_activity(session);
            created
        };
        if created {
            info!(target: "media.session", session_id = %session, "Session connected");
            metrics::set_sessions_active(self.sessions.count());
        }
    }

    /// Close a session. With `release`, objects it owned are destroyed even
    /// if other sessions only touched them.
    ///
    /// Returns how many objects were removed.
    pub async fn close_session(&self, session: &SessionId, release: bool) -> Result<usize, CoreError> {
        let kind = if release {
            CloseKind::Forced
        } else {
            CloseKind::Soft
        };
        let closure = GarbageCollector::new(&self.registry, &self.sessions)
            .close_session(session, kind)?
            .unwrap_or_default();
        let removed = closure.len();

        self.dispatcher.drop_session(session);
        self.teardown(closure.forced, "forced").await;
        self.teardown(closure.collected, "unreferenced").await;
        metrics::set_sessions_active(self.sessions.count());
        metrics::set_subscriptions_active(self.dispatcher.subscription_count());

        info!(
            target: "media.session",
            session_id = %session,
            release,
            removed,
            "Session closed"
        );
        Ok(removed)
    }

    /// Close every session idle for longer than the configured TTL.
    ///
    /// Returns how many sessions were closed.
    pub async fn sweep_idle_sessions(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.session_ttl;
        let mut closed = 0;

        for session in self.sessions.idle_sessions(now, ttl) {
            let closure = GarbageCollector::new(&self.registry, &self.sessions)
                .close_session(&session, CloseKind::Idle { now, ttl });
            // Sessions that woke up or closed concurrently are skipped.
            let Ok(Some(closure)) = closure else {
                continue;
            };
            self.dispatcher.drop_session(&session);
            self.teardown(closure.collected, "unreferenced").await;
            closed += 1;
            info!(
                target: "media.session",
                session_id = %session,
                "Idle session expired"
            );
        }

        if closed > 0 {
            metrics::set_sessions_active(self.sessions.count());
            metrics::set_subscriptions_active(self.dispatcher.subscription_count());
        }
        closed
    }

    /// Drop cached responses older than the retention window.
    pub fn evict_request_cache(&self) -> usize {
        self.cache.evict_expired(Instant::now())
    }

    /// Install the transport factory that builds event handlers.
    pub fn set_event_subscription_handler(&self, factory: Arc<dyn EventHandlerFactory>) {
        self.dispatcher.set_factory(factory);
    }

    /// Subscribe with a transport-supplied handler.
    pub fn connect_event_handler(
        &self,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, CoreError> {
        self.resolve_and_touch(session, object)?;
        let id = self
            .dispatcher
            .connect_event_handler(object, session, event_type, handler);
        self.ensure_still_live(object)?;
        metrics::set_subscriptions_active(self.dispatcher.subscription_count());
        Ok(id)
    }

    /// Share an existing handler under `subscription`.
    pub fn register_event_handler(
        &self,
        object: &ObjectId,
        session: &SessionId,
        subscription: SubscriptionId,
        handler: HandlerRef,
    ) -> Result<(), CoreError> {
        self.resolve_and_touch(session, object)?;
        self.dispatcher
            .register_event_handler(object, session, subscription, handler)?;
        self.ensure_still_live(object)?;
        metrics::set_subscriptions_active(self.dispatcher.subscription_count());
        Ok(())
    }

    /// Drop subscriptions added to an object that was destroyed meanwhile.
    pub(crate) fn ensure_still_live(&self, object: &ObjectId) -> Result<(), CoreError> {
        if self.registry.contains(object) {
            return Ok(());
        }
        self.dispatcher.drop_object(object);
        Err(CoreError::MediaObjectNotFound(object.clone()))
    }

    /// Live handler for `(object, event type, session)`, or for
    /// `(object, event type)` when the installed factory broadcasts.
    #[must_use]
    pub fn lookup_event_handler(
        &self,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
    ) -> Option<HandlerRef> {
        self.dispatcher.lookup_handler(object, session, event_type)
    }

    /// Raise an event on behalf of `object`. Returns deliveries made.
    pub fn emit(&self, object: &ObjectId, event_type: &str, data: Value) -> Result<usize, CoreError> {
        if !self.registry.contains(object) {
            return Err(CoreError::MediaObjectNotFound(object.clone()));
        }
        Ok(self
            .dispatcher
            .dispatch(&MediaEvent::new(object.clone(), event_type, data)))
    }

    /// Close every session and release every object.
    pub async fn shutdown(&self) {
        let (sessions, removed) = {
            let mut registry = self.registry.lock();
            let mut sessions = self.sessions.lock();
            let ids = sessions.session_ids();
            for id in &ids {
                sessions.remove_session(id);
            }
            (ids, registry.drain())
        };

        for session in &sessions {
            self.dispatcher.drop_session(session);
        }
        let objects = removed.len();
        self.teardown(removed, "shutdown").await;
        metrics::set_sessions_active(0);
        metrics::set_subscriptions_active(self.dispatcher.subscription_count());

        info!(
            target: "media.core",
            sessions = sessions.len(),
            objects,
            "Core shut down"
        );
    }

    /// Release engine elements and subscriptions of removed objects.
    ///
    /// Called with no lock held.
    pub(crate) async fn teardown(&self, removed: Vec<Arc<MediaObject>>, reason: &'static str) {
        if removed.is_empty() {
            return;
        }
        let count = removed.len();
        for object in removed {
            self.dispatcher.drop_object(&object.id);
            object.element.release().await;
            debug!(
                target: "media.core",
                object_id = %object.id,
                reason,
                "Object destroyed"
            );
        }
        metrics::record_objects_collected(reason, count);
        metrics::set_objects_active(self.registry.size());
        metrics::set_subscriptions_active(self.dispatcher.subscription_count());
    }

    #[must_use]
    pub fn status(&self) -> CoreStatus {
        CoreStatus {
            objects: self.registry.size(),
            sessions: self.sessions.count(),
            subscriptions: self.dispatcher.subscription_count(),
            handlers: self.dispatcher.handler_count(),
        }
    }

    /// Every object with its children and holders, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObjectSnapshot> {
        let registry = self.registry.lock();
        let sessions = self.sessions.lock();
        registry
            .objects()
            .into_iter()
            .map(|object| ObjectSnapshot {
                children: registry.children_of(&object.id),
                holders: sessions
                    .holders_of(&object.id)
                    .into_iter()
                    .map(|(session_id, strength)| HolderSnapshot {
                        session_id,
                        strength: strength.as_str(),
                    })
                    .collect(),
                qualified_type: object.descriptor.qualified_name.clone(),
                parent: object.parent.clone(),
                id: object.id.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.registry.size()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.count()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.dispatcher.subscription_count()
    }

    #[must_use]
    pub fn contains_object(&self, id: &ObjectId) -> bool {
        self.registry.contains(id)
    }

    #[must_use]
    pub fn contains_session(&self, session: &SessionId) -> bool {
        self.sessions.contains(session)
    }

    /// How strongly `session` holds `object`, if at all.
    #[must_use]
    pub fn reference_of(&self, session: &SessionId, object: &ObjectId) -> Option<RefStrength> {
        self.sessions
            .references_of(session)
            .into_iter()
            .find(|(id, _)| id == object)
            .map(|(_, strength)| strength)
    }

    #[cfg(test)]
    pub(crate) fn loopback_for_tests() -> Arc<Core> {
        CoreBuilder::new(CoreConfig::default())
            .with_loopback_types()
            .build()
    }
}
