//! In-memory loopback engine.
//!
//! Elements keep properties and sink connections in memory and raise
//! `ElementConnected` / `ElementDisconnected` events. No media flows. Used
//! when no native engine is linked and by the core's own tests.

use super::{
    ConstructContext, ElementFactory, InvokeContext, MediaElement, ObjectKind, TypeDescriptor,
    TypeRegistry,
};
use crate::errors::EngineError;
use crate::events::EventEmitter;

use async_trait::async_trait;
use common::types::ObjectId;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

/// Module prefix for loopback types.
pub const MODULE: &str = "kurento";

/// Raised when elements of different pipelines are connected.
pub const CONNECT_ERROR_CODE: i32 = 40109;

const MEDIA_OBJECT: &str = "kurento.MediaObject";
const MEDIA_ELEMENT: &str = "kurento.MediaElement";

/// Register every loopback type.
pub fn register_types(types: &mut TypeRegistry) {
    let factory: Arc<dyn ElementFactory> = Arc::new(LoopbackFactory);

    types
        .register(
            TypeDescriptor::new(MODULE, "MediaPipeline", ObjectKind::Pipeline)
                .extends([MEDIA_OBJECT]),
            Arc::clone(&factory),
        )
        .register(
            TypeDescriptor::new(MODULE, "PassThrough", ObjectKind::Filter)
                .extends(["kurento.Filter", MEDIA_ELEMENT, MEDIA_OBJECT])
                .child_of("mediaPipeline", ObjectKind::Pipeline),
            Arc::clone(&factory),
        )
        .register(
            TypeDescriptor::new(MODULE, "WebRtcEndpoint", ObjectKind::Endpoint)
                .extends([
                    "kurento.BaseRtpEndpoint",
                    "kurento.SdpEndpoint",
                    "kurento.SessionEndpoint",
                    "kurento.Endpoint",
                    MEDIA_ELEMENT,
                    MEDIA_OBJECT,
                ])
                .child_of("mediaPipeline", ObjectKind::Pipeline),
            Arc::clone(&factory),
        )
        .register(
            TypeDescriptor::new(MODULE, "RtpEndpoint", ObjectKind::Endpoint)
                .extends([
                    "kurento.BaseRtpEndpoint",
                    "kurento.SdpEndpoint",
                    "kurento.SessionEndpoint",
                    "kurento.Endpoint",
                    MEDIA_ELEMENT,
                    MEDIA_OBJECT,
                ])
                .child_of("mediaPipeline", ObjectKind::Pipeline),
            Arc::clone(&factory),
        )
        .register(
            TypeDescriptor::new(MODULE, "Composite", ObjectKind::Mixer)
                .extends(["kurento.Hub", MEDIA_OBJECT])
                .child_of("mediaPipeline", ObjectKind::Pipeline),
            Arc::clone(&factory),
        )
        .register(
            TypeDescriptor::new(MODULE, "HubPort", ObjectKind::HubPort)
                .extends([MEDIA_ELEMENT, MEDIA_OBJECT])
                .child_of("hub", ObjectKind::Mixer),
            factory,
        );
}

/// Builds [`LoopbackElement`]s for every loopback type.
pub struct LoopbackFactory;

#[async_trait]
impl ElementFactory for LoopbackFactory {
    async fn construct(
        &self,
        ctx: ConstructContext<'_>,
        params: &Value,
    ) -> Result<Arc<dyn MediaElement>, EngineError> {
        let properties = match params.get("properties") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(EngineError::illegal_param(
                    "'properties' must be an object",
                ))
            }
        };

        debug!(
            target: "media.engine.loopback",
            object_id = %ctx.object_id,
            type_name = %ctx.descriptor.type_name,
            "Constructing loopback element"
        );

        Ok(Arc::new(LoopbackElement {
            type_name: ctx.descriptor.type_name.clone(),
            kind: ctx.descriptor.kind,
            emitter: ctx.emitter,
            state: Mutex::new(LoopbackState {
                properties,
                sinks: Vec::new(),
            }),
        }))
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    properties: Map<String, Value>,
    sinks: Vec<ObjectId>,
}

/// Element that records what it is asked to do.
pub struct LoopbackElement {
    type_name: String,
    kind: ObjectKind,
    emitter: EventEmitter,
    state: Mutex<LoopbackState>,
}

impl LoopbackElement {
    /// Ids this element is connected to, in connection order.
    #[must_use]
    pub fn sinks(&self) -> Vec<ObjectId> {
        self.state.lock().sinks.clone()
    }

    /// Sinks that still exist. Destroyed sinks are forgotten.
    fn live_sinks(&self, ctx: &InvokeContext<'_>) -> Vec<ObjectId> {
        let (live, gone): (Vec<ObjectId>, Vec<ObjectId>) = self
            .sinks()
            .into_iter()
            .partition(|id| ctx.resolver.resolve::<LoopbackElement>(id).is_ok());
        if !gone.is_empty() {
            self.state.lock().sinks.retain(|id| !gone.contains(id));
        }
        live
    }

    fn can_connect(&self) -> bool {
        !matches!(self.kind, ObjectKind::Pipeline | ObjectKind::Mixer)
    }

    fn connect(&self, ctx: &InvokeContext<'_>, params: &Value) -> Result<Value, EngineError> {
        let sink_id = object_param(params, "sink")?;
        let sink = ctx.resolver.resolve::<LoopbackElement>(&sink_id)?;
        if !self.can_connect() || !sink.can_connect() {
            return Err(EngineError::illegal_param(format!(
                "{} cannot be connected to {}",
                self.type_name, sink.type_name
            )));
        }
        if !ctx.resolver.same_pipeline(ctx.object_id, &sink_id)? {
            return Err(EngineError::new(
                CONNECT_ERROR_CODE,
                "CONNECT_ERROR",
                "Elements belong to different pipelines",
            ));
        }

        self.live_sinks(ctx);
        let added = {
            let mut state = self.state.lock();
            if state.sinks.contains(&sink_id) {
                false
            } else {
                state.sinks.push(sink_id.clone());
                true
            }
        };
        if added {
            self.emitter.emit(
                "ElementConnected",
                json!({ "source": ctx.object_id, "sink": sink_id }),
            );
        }
        Ok(Value::Null)
    }

    fn disconnect(&self, ctx: &InvokeContext<'_>, params: &Value) -> Result<Value, EngineError> {
        let sink_id = object_param(params, "sink")?;
        let removed = {
            let mut state = self.state.lock();
            let before = state.sinks.len();
            state.sinks.retain(|id| id != &sink_id);
            state.sinks.len() != before
        };
        if removed {
            self.emitter.emit(
                "ElementDisconnected",
                json!({ "source": ctx.object_id, "sink": sink_id }),
            );
        }
        Ok(Value::Null)
    }
}

#[async_trait]
impl MediaElement for LoopbackElement {
    async fn invoke(
        &self,
        ctx: &InvokeContext<'_>,
        operation: &str,
        params: &Value,
    ) -> Result<Value, EngineError> {
        match operation {
            "connect" => self.connect(ctx, params),
            "disconnect" => self.disconnect(ctx, params),
            "getSinkConnections" => Ok(json!(self.live_sinks(ctx))),
            "setProperty" => {
                let name = string_param(params, "name")?;
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                self.state.lock().properties.insert(name, value);
                Ok(Value::Null)
            }
            "getProperty" => {
                let name = string_param(params, "name")?;
                Ok(self
                    .state
                    .lock()
                    .properties
                    .get(&name)
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            "getProperties" => Ok(Value::Object(self.state.lock().properties.clone())),
            other => Err(EngineError::unsupported_operation(&self.type_name, other)),
        }
    }

    async fn release(&self) {
        let mut state = self.state.lock();
        state.sinks.clear();
        debug!(
            target: "media.engine.loopback",
            object_id = %self.emitter.object_id(),
            "Loopback element released"
        );
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn string_param(params: &Value, name: &str) -> Result<String, EngineError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::illegal_param(format!("missing string parameter '{name}'")))
}

fn object_param(params: &Value, name: &str) -> Result<ObjectId, EngineError> {
    string_param(params, name).map(ObjectId::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::core::Core;
    use crate::processor::{Operation, Request};
    use common::types::SessionId;
    use serde_json::json;

    async fn create(core: &Core, session: &SessionId, type_name: &str, params: Value) -> ObjectId {
        let response = core
            .process(Request::new(
                session.clone(),
                Operation::create(type_name, params),
            ))
            .await;
        let value = response.result.expect("create should succeed");
        ObjectId::from(value["value"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_connect_records_sink_and_rejects_cross_pipeline() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();

        let p1 = create(&core, &session, "MediaPipeline", json!({})).await;
        let p2 = create(&core, &session, "MediaPipeline", json!({})).await;
        let a = create(
            &core,
            &session,
            "PassThrough",
            json!({"mediaPipeline": p1}),
        )
        .await;
        let b = create(
            &core,
            &session,
            "PassThrough",
            json!({"mediaPipeline": p1}),
        )
        .await;
        let c = create(
            &core,
            &session,
            "PassThrough",
            json!({"mediaPipeline": p2}),
        )
        .await;

        let ok = core
            .process(Request::new(
                session.clone(),
                Operation::invoke(&a, "connect", json!({"sink": b})),
            ))
            .await;
        assert!(ok.error.is_none(), "connect failed: {:?}", ok.error);

        let cross = core
            .process(Request::new(
                session.clone(),
                Operation::invoke(&a, "connect", json!({"sink": c})),
            ))
            .await;
        assert_eq!(cross.error.unwrap().code, CONNECT_ERROR_CODE);

        let sinks = core
            .process(Request::new(
                session.clone(),
                Operation::invoke(&a, "getSinkConnections", json!({})),
            ))
            .await;
        assert_eq!(sinks.result.unwrap()["value"], json!([b]));
    }

    #[tokio::test]
    async fn test_released_sink_is_dropped_from_connections() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(&core, &session, "MediaPipeline", json!({})).await;
        let a = create(
            &core,
            &session,
            "PassThrough",
            json!({"mediaPipeline": pipeline}),
        )
        .await;
        let b = create(
            &core,
            &session,
            "PassThrough",
            json!({"mediaPipeline": pipeline}),
        )
        .await;
        core.process(Request::new(
            session.clone(),
            Operation::invoke(&a, "connect", json!({"sink": b})),
        ))
        .await;

        let released = core
            .process(Request::new(session.clone(), Operation::release(&b)))
            .await;
        assert!(released.error.is_none());

        let sinks = core
            .process(Request::new(
                session.clone(),
                Operation::invoke(&a, "getSinkConnections", json!({})),
            ))
            .await;
        assert_eq!(sinks.result.unwrap()["value"], json!([]));
    }

    #[tokio::test]
    async fn test_properties_round_trip_through_invoke() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(
            &core,
            &session,
            "MediaPipeline",
            json!({"properties": {"latency": 200}}),
        )
        .await;

        let response = core
            .process(Request::new(
                session.clone(),
                Operation::invoke(&pipeline, "getProperty", json!({"name": "latency"})),
            ))
            .await;
        assert_eq!(response.result.unwrap()["value"], 200);
    }

    #[tokio::test]
    async fn test_unknown_operation_surfaces_engine_error() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(&core, &session, "MediaPipeline", json!({})).await;

        let response = core
            .process(Request::new(
                session.clone(),
                Operation::invoke(&pipeline, "explode", json!({})),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, EngineError::OPERATION_NOT_FOUND);
        assert_eq!(
            error.data.unwrap()["type"],
            "MEDIA_OBJECT_OPERATION_NOT_FOUND"
        );
    }

    #[test]
    fn test_engine_codes_do_not_collide_with_core_codes() {
        let core_codes: Vec<i32> = common::error::ErrorCode::CORE
            .iter()
            .map(common::error::ErrorCode::code)
            .collect();
        for code in [
            EngineError::OPERATION_NOT_FOUND,
            EngineError::ILLEGAL_PARAM,
            CONNECT_ERROR_CODE,
        ] {
            assert!(!core_codes.contains(&code), "engine code {code} is reserved");
        }
    }
}
