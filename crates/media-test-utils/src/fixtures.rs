//! Pre-built cores and request helpers.

use crate::mock_engine::MockEngine;

use common::types::{ObjectId, SessionId};
use media_controller::admission::ResourceProbe;
use media_controller::config::CoreConfig;
use media_controller::core::{Core, CoreBuilder};
use media_controller::engine::TypeRegistry;
use media_controller::processor::{Operation, Request, Response};
use serde_json::{json, Value};
use std::sync::Arc;

/// Core with the loopback types and the mock types.
#[must_use]
pub fn test_core() -> (Arc<Core>, MockEngine) {
    test_core_with(CoreConfig::default(), None)
}

/// Core with custom settings and, optionally, a custom admission probe.
#[must_use]
pub fn test_core_with(
    config: CoreConfig,
    probe: Option<Arc<dyn ResourceProbe>>,
) -> (Arc<Core>, MockEngine) {
    let engine = MockEngine::new();
    let mut types = TypeRegistry::new();
    engine.register(&mut types);

    let mut builder = CoreBuilder::new(config).types(types).with_loopback_types();
    if let Some(probe) = probe {
        builder = builder.probe(probe);
    }
    (builder.build(), engine)
}

/// Run `operation` in `session` without a request id.
pub async fn run(core: &Core, session: &SessionId, operation: Operation) -> Response {
    core.process(Request::new(session.clone(), operation)).await
}

/// Create an object and return its id. Panics if the create fails.
pub async fn create(core: &Core, session: &SessionId, type_name: &str, params: Value) -> ObjectId {
    let response = run(core, session, Operation::create(type_name, params)).await;
    let result = response
        .result
        .unwrap_or_else(|| panic!("create {type_name} failed: {:?}", response.error));
    ObjectId::from(
        result["value"]
            .as_str()
            .expect("create result should carry the object id"),
    )
}

/// Create a `MockPipeline`.
pub async fn create_pipeline(core: &Core, session: &SessionId) -> ObjectId {
    create(core, session, "MockPipeline", json!({})).await
}

/// Create a `MockElement` under `pipeline`.
pub async fn create_element(core: &Core, session: &SessionId, pipeline: &ObjectId) -> ObjectId {
    create(core, session, "MockElement", json!({ "mediaPipeline": pipeline })).await
}

/// Error code of a failed response. Panics on success.
#[must_use]
pub fn error_code(response: &Response) -> i32 {
    response
        .error
        .as_ref()
        .unwrap_or_else(|| panic!("expected an error, got {:?}", response.result))
        .code
}
