//! Seam between the core and the media engine.
//!
//! The core never knows concrete element types. Each object type is a
//! [`TypeDescriptor`] plus an [`ElementFactory`] registered in a
//! [`TypeRegistry`] at startup; `create` looks the tag up and calls the
//! factory. Adding a new object kind is a registration, not a branch.
//!
//! Elements never hold pointers to other objects. They keep [`ObjectId`]s and
//! resolve them through the [`ObjectResolver`] handed to each call, so the
//! registry stays the only owner of every object.

pub mod loopback;

use crate::errors::{CoreError, EngineError};
use crate::events::EventEmitter;
use crate::registry::Registry;

use async_trait::async_trait;
use common::error::ErrorCode;
use common::types::{ObjectId, SessionId};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Closed set of object categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Pipeline,
    Endpoint,
    Filter,
    Mixer,
    HubPort,
}

impl ObjectKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Pipeline => "pipeline",
            ObjectKind::Endpoint => "endpoint",
            ObjectKind::Filter => "filter",
            ObjectKind::Mixer => "mixer",
            ObjectKind::HubPort => "hub_port",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an object of a given type hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRule {
    /// Root object (pipelines).
    Root,
    /// Child of the object named by constructor parameter `param`, which
    /// must be of kind `kind`.
    Required { param: String, kind: ObjectKind },
}

/// Static metadata for one object type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// Short type name (`"PassThrough"`).
    pub type_name: String,
    /// Module-qualified name (`"kurento.PassThrough"`).
    pub qualified_name: String,
    /// Linear superclass chain, nearest first.
    pub hierarchy: Vec<String>,
    pub kind: ObjectKind,
    pub parent: ParentRule,
}

impl TypeDescriptor {
    /// Describe a root type in `module`.
    #[must_use]
    pub fn new(module: &str, type_name: &str, kind: ObjectKind) -> Self {
        Self {
            type_name: type_name.to_string(),
            qualified_name: format!("{module}.{type_name}"),
            hierarchy: Vec::new(),
            kind,
            parent: ParentRule::Root,
        }
    }

    /// Set the superclass chain (qualified names, nearest first).
    #[must_use]
    pub fn extends<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hierarchy = chain.into_iter().map(Into::into).collect();
        self
    }

    /// Require a parent of `kind` passed as constructor parameter `param`.
    #[must_use]
    pub fn child_of(mut self, param: &str, kind: ObjectKind) -> Self {
        self.parent = ParentRule::Required {
            param: param.to_string(),
            kind,
        };
        self
    }
}

/// Engine-side implementation of one media object.
#[async_trait]
pub trait MediaElement: Send + Sync + 'static {
    /// Execute an engine operation. May block for as long as the engine
    /// needs; the core holds no lock while this runs.
    async fn invoke(
        &self,
        ctx: &InvokeContext<'_>,
        operation: &str,
        params: &Value,
    ) -> Result<Value, EngineError>;

    /// Called exactly once after the object has left the registry.
    async fn release(&self) {}

    /// Upcast for typed lookups via [`Registry::get_as`].
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Builds elements of one type.
#[async_trait]
pub trait ElementFactory: Send + Sync {
    async fn construct(
        &self,
        ctx: ConstructContext<'_>,
        params: &Value,
    ) -> Result<Arc<dyn MediaElement>, EngineError>;
}

/// Passed to [`ElementFactory::construct`].
pub struct ConstructContext<'a> {
    /// Id the new object will be registered under.
    pub object_id: ObjectId,
    /// Parent id, when the type has one.
    pub parent: Option<ObjectId>,
    pub descriptor: &'a TypeDescriptor,
    /// Raises events on behalf of the new object.
    pub emitter: EventEmitter,
    pub resolver: ObjectResolver<'a>,
}

/// Passed to [`MediaElement::invoke`].
pub struct InvokeContext<'a> {
    pub object_id: &'a ObjectId,
    pub session_id: &'a SessionId,
    pub resolver: ObjectResolver<'a>,
}

/// Non-owning lookup of other objects by id.
#[derive(Clone, Copy)]
pub struct ObjectResolver<'a> {
    registry: &'a Registry,
}

impl<'a> ObjectResolver<'a> {
    pub(crate) fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolve `id` to its concrete element type.
    pub fn resolve<T: MediaElement>(&self, id: &ObjectId) -> Result<Arc<T>, EngineError> {
        self.registry.get_as::<T>(id).map_err(engine_not_found)
    }

    /// Whether two objects belong to the same root pipeline.
    pub fn same_pipeline(&self, a: &ObjectId, b: &ObjectId) -> Result<bool, EngineError> {
        let root_a = self.registry.root_of(a).map_err(engine_not_found)?;
        let root_b = self.registry.root_of(b).map_err(engine_not_found)?;
        Ok(root_a == root_b)
    }
}

fn engine_not_found(err: CoreError) -> EngineError {
    let code = ErrorCode::MediaObjectNotFound;
    EngineError::new(code.code(), code.as_str(), err.to_string())
}

struct RegisteredType {
    descriptor: Arc<TypeDescriptor>,
    factory: Arc<dyn ElementFactory>,
}

/// Maps type tags to constructors. Built once at startup.
///
/// Lookups accept either the short or the qualified type name.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<RegisteredType>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. A later registration with the same name replaces
    /// the earlier one.
    pub fn register(
        &mut self,
        descriptor: TypeDescriptor,
        factory: Arc<dyn ElementFactory>,
    ) -> &mut Self {
        let entry = Arc::new(RegisteredType {
            descriptor: Arc::new(descriptor),
            factory,
        });
        self.types
            .insert(entry.descriptor.type_name.clone(), Arc::clone(&entry));
        self.types
            .insert(entry.descriptor.qualified_name.clone(), entry);
        self
    }

    /// Resolve a type tag.
    pub fn lookup(
        &self,
        tag: &str,
    ) -> Result<(Arc<TypeDescriptor>, Arc<dyn ElementFactory>), CoreError> {
        self.types
            .get(tag)
            .map(|entry| (Arc::clone(&entry.descriptor), Arc::clone(&entry.factory)))
            .ok_or_else(|| CoreError::UnknownType(tag.to_string()))
    }

    /// Short names of every registered type, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .values()
            .map(|entry| entry.descriptor.type_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let descriptor = TypeDescriptor::new("kurento", "HubPort", ObjectKind::HubPort)
            .extends(["kurento.MediaElement", "kurento.MediaObject"])
            .child_of("hub", ObjectKind::Mixer);

        assert_eq!(descriptor.qualified_name, "kurento.HubPort");
        assert_eq!(descriptor.hierarchy.len(), 2);
        assert_eq!(
            descriptor.parent,
            ParentRule::Required {
                param: "hub".to_string(),
                kind: ObjectKind::Mixer
            }
        );
    }

    #[test]
    fn test_lookup_by_short_and_qualified_name() {
        let mut types = TypeRegistry::new();
        loopback::register_types(&mut types);

        let (short, _) = types.lookup("MediaPipeline").unwrap();
        let (qualified, _) = types.lookup("kurento.MediaPipeline").unwrap();
        assert_eq!(short.qualified_name, qualified.qualified_name);
        assert_eq!(short.kind, ObjectKind::Pipeline);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let types = TypeRegistry::new();
        let err = types.lookup("NoSuchElement").err().unwrap();
        assert!(matches!(err, CoreError::UnknownType(tag) if tag == "NoSuchElement"));
    }

    #[test]
    fn test_type_names_are_unique() {
        let mut types = TypeRegistry::new();
        loopback::register_types(&mut types);
        let names = types.type_names();
        assert!(names.contains(&"PassThrough".to_string()));
        let mut sorted = names.clone();
        sorted.dedup();
        assert_eq!(sorted, names);
    }
}
