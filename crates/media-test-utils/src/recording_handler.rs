//! Event handler factory that records every delivery.

use common::types::{ObjectId, SessionId};
use media_controller::errors::CoreError;
use media_controller::events::{EventHandler, EventHandlerFactory, HandlerScope, MediaEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One recorded delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub session: SessionId,
    pub event: MediaEvent,
}

#[derive(Debug, Default)]
struct Recorded {
    deliveries: Mutex<Vec<Delivery>>,
    built: AtomicUsize,
}

/// Factory whose handlers push into a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandlerFactory {
    recorded: Arc<Recorded>,
    scope: HandlerScope,
}

impl RecordingHandlerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose handlers are shared by all sessions.
    #[must_use]
    pub fn broadcast() -> Self {
        Self {
            scope: HandlerScope::Broadcast,
            ..Self::default()
        }
    }

    /// Every delivery so far, in order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.recorded.deliveries.lock().clone()
    }

    /// Deliveries of `event_type` only.
    #[must_use]
    pub fn deliveries_of(&self, event_type: &str) -> Vec<Delivery> {
        self.recorded
            .deliveries
            .lock()
            .iter()
            .filter(|d| d.event.event_type == event_type)
            .cloned()
            .collect()
    }

    /// How many handlers the factory has built.
    #[must_use]
    pub fn handlers_built(&self) -> usize {
        self.recorded.built.load(Ordering::SeqCst)
    }
}

struct RecordingHandler {
    session: SessionId,
    recorded: Arc<Recorded>,
}

impl EventHandler for RecordingHandler {
    fn deliver(&self, event: &MediaEvent) {
        self.recorded.deliveries.lock().push(Delivery {
            session: self.session.clone(),
            event: event.clone(),
        });
    }
}

impl EventHandlerFactory for RecordingHandlerFactory {
    fn scope(&self) -> HandlerScope {
        self.scope
    }

    fn build(
        &self,
        _object: &ObjectId,
        session: &SessionId,
        _event_type: &str,
        _transport_params: &Value,
    ) -> Result<Arc<dyn EventHandler>, CoreError> {
        self.recorded.built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingHandler {
            session: session.clone(),
            recorded: Arc::clone(&self.recorded),
        }))
    }
}
