//! Mock engine for core testing.
//!
//! Registers two types, `MockPipeline` (root) and `MockElement` (child of a
//! pipeline via `mediaPipeline`), backed by elements that count what the
//! core asks of them.
//!
//! # Operations
//!
//! - `echo` - returns its params
//! - `fail` - returns an engine error with code [`MOCK_ENGINE_ERROR_CODE`]
//! - `emit` - raises `params.type` with `params.data`; returns deliveries
//! - `sleep` - waits `params.ms` milliseconds, then returns the invocation count
//!
//! # Example
//!
//! ```rust,ignore
//! use media_test_utils::MockEngine;
//!
//! let engine = MockEngine::new();
//! let mut types = TypeRegistry::new();
//! engine.register(&mut types);
//!
//! // ... build a core with `types`, run requests ...
//! assert_eq!(engine.releases(), 2);
//! ```

use async_trait::async_trait;
use media_controller::engine::{
    ConstructContext, ElementFactory, InvokeContext, MediaElement, ObjectKind, TypeDescriptor,
    TypeRegistry,
};
use media_controller::errors::EngineError;
use media_controller::events::EventEmitter;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Module prefix of the mock types.
pub const MOCK_MODULE: &str = "mock";

/// Code carried by errors from the `fail` operation.
pub const MOCK_ENGINE_ERROR_CODE: i32 = 40_900;

#[derive(Debug, Default)]
struct Counters {
    constructed: AtomicUsize,
    invoked: AtomicUsize,
    released: AtomicUsize,
    fail_constructs: AtomicBool,
}

/// Shared handle over every element the mock types build.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    counters: Arc<Counters>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `MockPipeline` and `MockElement`.
    pub fn register(&self, types: &mut TypeRegistry) {
        let factory: Arc<dyn ElementFactory> = Arc::new(MockFactory {
            counters: Arc::clone(&self.counters),
        });
        types
            .register(
                TypeDescriptor::new(MOCK_MODULE, "MockPipeline", ObjectKind::Pipeline),
                Arc::clone(&factory),
            )
            .register(
                TypeDescriptor::new(MOCK_MODULE, "MockElement", ObjectKind::Endpoint)
                    .extends(["mock.Element"])
                    .child_of("mediaPipeline", ObjectKind::Pipeline),
                factory,
            );
    }

    /// Make every following construction fail (or succeed again).
    pub fn fail_constructs(&self, fail: bool) {
        self.counters.fail_constructs.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn constructions(&self) -> usize {
        self.counters.constructed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn invocations(&self) -> usize {
        self.counters.invoked.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn releases(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }
}

struct MockFactory {
    counters: Arc<Counters>,
}

#[async_trait]
impl ElementFactory for MockFactory {
    async fn construct(
        &self,
        ctx: ConstructContext<'_>,
        _params: &Value,
    ) -> Result<Arc<dyn MediaElement>, EngineError> {
        if self.counters.fail_constructs.load(Ordering::SeqCst) {
            return Err(EngineError::new(
                MOCK_ENGINE_ERROR_CODE,
                "CONSTRUCTION_FAILED",
                format!("mock refused to build {}", ctx.descriptor.type_name),
            ));
        }
        self.counters.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockElement {
            emitter: ctx.emitter,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Element built by the mock types.
pub struct MockElement {
    emitter: EventEmitter,
    counters: Arc<Counters>,
}

#[async_trait]
impl MediaElement for MockElement {
    async fn invoke(
        &self,
        _ctx: &InvokeContext<'_>,
        operation: &str,
        params: &Value,
    ) -> Result<Value, EngineError> {
        let count = self.counters.invoked.fetch_add(1, Ordering::SeqCst) + 1;
        match operation {
            "echo" => Ok(params.clone()),
            "fail" => Err(EngineError::new(
                MOCK_ENGINE_ERROR_CODE,
                "MOCK_FAILURE",
                "mock failure",
            )
            .with_data(params.clone())),
            "emit" => {
                let event_type = params
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("MockEvent");
                let data = params.get("data").cloned().unwrap_or(Value::Null);
                Ok(json!(self.emitter.emit(event_type, data)))
            }
            "sleep" => {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(count))
            }
            other => Err(EngineError::unsupported_operation("MockElement", other)),
        }
    }

    async fn release(&self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
