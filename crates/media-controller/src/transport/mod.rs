//! Transports bundled with the binary.
//!
//! - `http` - JSON requests over `POST /rpc`
//! - `LogHandlerFactory` - event handlers for transports that cannot push;
//!   events are written to the log instead of a client connection

pub mod http;

pub use http::rpc_router;

use crate::errors::CoreError;
use crate::events::{EventHandler, EventHandlerFactory, MediaEvent};

use common::types::{ObjectId, SessionId};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Builds handlers that log each delivered event.
#[derive(Debug, Default)]
pub struct LogHandlerFactory;

struct LogHandler {
    session: SessionId,
}

impl EventHandler for LogHandler {
    fn deliver(&self, event: &MediaEvent) {
        info!(
            target: "media.transport.events",
            session_id = %self.session,
            object_id = %event.object,
            event_type = %event.event_type,
            "Event delivered"
        );
    }
}

impl EventHandlerFactory for LogHandlerFactory {
    fn build(
        &self,
        _object: &ObjectId,
        session: &SessionId,
        _event_type: &str,
        _transport_params: &Value,
    ) -> Result<Arc<dyn EventHandler>, CoreError> {
        Ok(Arc::new(LogHandler {
            session: session.clone(),
        }))
    }
}
