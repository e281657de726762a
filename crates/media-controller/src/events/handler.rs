//! Event payloads and the transport-facing handler traits.

use super::EventDispatcher;
use crate::errors::CoreError;

use chrono::{DateTime, Utc};
use common::types::{ObjectId, SessionId};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// A signal raised by a media object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEvent {
    pub object: ObjectId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl MediaEvent {
    #[must_use]
    pub fn new(object: ObjectId, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            object,
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Transport-bound delivery endpoint.
///
/// `deliver` runs on the emitting task and must not block.
pub trait EventHandler: Send + Sync {
    fn deliver(&self, event: &MediaEvent);
}

/// Whether a transport's handlers are per session or shared by all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerScope {
    /// One handler per `(object, event type, session)`.
    #[default]
    Session,
    /// One handler per `(object, event type)`, for broker-style transports.
    Broadcast,
}

/// Builds handlers for a transport. Installed once at startup.
pub trait EventHandlerFactory: Send + Sync {
    fn scope(&self) -> HandlerScope {
        HandlerScope::Session
    }

    fn build(
        &self,
        object: &ObjectId,
        session: &SessionId,
        event_type: &str,
        transport_params: &Value,
    ) -> Result<Arc<dyn EventHandler>, CoreError>;
}

/// Raises events on behalf of one object.
///
/// Holds only a weak handle to the dispatcher, so an element outliving the
/// core emits into nothing.
#[derive(Clone)]
pub struct EventEmitter {
    object: ObjectId,
    dispatcher: Weak<EventDispatcher>,
}

impl EventEmitter {
    #[must_use]
    pub fn new(object: ObjectId, dispatcher: &Arc<EventDispatcher>) -> Self {
        Self {
            object,
            dispatcher: Arc::downgrade(dispatcher),
        }
    }

    /// Emitter wired to nothing.
    #[must_use]
    pub fn detached(object: ObjectId) -> Self {
        Self {
            object,
            dispatcher: Weak::new(),
        }
    }

    #[must_use]
    pub fn object_id(&self) -> &ObjectId {
        &self.object
    }

    /// Emit an event. Returns how many handlers received it.
    pub fn emit(&self, event_type: &str, data: Value) -> usize {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => {
                dispatcher.dispatch(&MediaEvent::new(self.object.clone(), event_type, data))
            }
            None => 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_type_field() {
        let event = MediaEvent::new(ObjectId::from("o"), "ElementConnected", json!({"sink": "x"}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["object"], "o");
        assert_eq!(value["type"], "ElementConnected");
        assert_eq!(value["data"]["sink"], "x");
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_emitter_without_dispatcher_delivers_nothing() {
        let emitter = EventEmitter::detached(ObjectId::from("o"));
        assert_eq!(emitter.emit("E", Value::Null), 0);

        let dispatcher = Arc::new(EventDispatcher::new());
        let emitter = EventEmitter::new(ObjectId::from("o"), &dispatcher);
        drop(dispatcher);
        assert_eq!(emitter.emit("E", Value::Null), 0);
    }
}
