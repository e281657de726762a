//! Request processing.
//!
//! One request moves through:
//!
//! ```text
//! Received -> Replayed                       (cached response, returned verbatim)
//!          -> Fresh -> Decoded -> Executed -> Cached
//!                   -> Rejected              (validation error, no state change)
//! ```
//!
//! Only requests carrying both an id and a client-supplied session id are
//! cached; anything else is executed every time it arrives.

mod builtin;
pub mod dedup;
mod request;
mod response;
mod transaction;

pub use dedup::{Lookup, RequestCache};
pub use request::{
    CloseSessionParams, CreateParams, InvokeParams, ObjectParams, Operation, Request,
    SubscribeParams, TransactionParams, UnsubscribeParams,
};
pub use response::Response;

use crate::core::Core;
use crate::engine::{ConstructContext, InvokeContext, ObjectResolver, ParentRule};
use crate::errors::CoreError;
use crate::events::EventEmitter;
use crate::observability::metrics;
use crate::registry::MediaObject;
use crate::session::{GarbageCollector, RefStrength, SessionTable};

use common::types::{ObjectId, SessionId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use transaction::{allowed_in_transaction, split_sub_operation, ForwardRefs};

/// Bounded `method` label values.
const KNOWN_METHODS: [&str; 13] = [
    "create",
    "invoke",
    "ref",
    "unref",
    "release",
    "describe",
    "subscribe",
    "unsubscribe",
    "transaction",
    "closeSession",
    "keepAlive",
    "connect",
    "ping",
];

fn method_label(method: &str) -> &'static str {
    KNOWN_METHODS
        .iter()
        .find(|known| **known == method)
        .copied()
        .unwrap_or("unknown")
}

/// Marks a request as in flight for its session so the idle sweep leaves
/// the session alone until the request finishes.
struct ActivityGuard<'a> {
    sessions: &'a SessionTable,
    session: SessionId,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.sessions.lock().leave(&self.session);
    }
}

impl Core {
    /// Execute one request and produce its response.
    ///
    /// Never fails: every error becomes an error response. The response
    /// carries the session id the request ran in, which is minted when the
    /// request did not name one.
    #[instrument(skip_all, name = "media.processor.process", fields(method = %request.method))]
    pub async fn process(&self, request: Request) -> Response {
        let started = Instant::now();
        let Request {
            id,
            session_id: supplied,
            method,
            params,
        } = request;

        let guard = match (&id, &supplied) {
            (Some(request_id), Some(session)) => {
                match self.cache.begin(session.clone(), request_id.clone()) {
                    Lookup::Fresh(guard) => Some(guard),
                    Lookup::Replay(response) => {
                        metrics::record_request_replay();
                        debug!(
                            target: "media.processor",
                            session_id = %session,
                            request_id = %request_id,
                            "Replaying cached response"
                        );
                        return response;
                    }
                    Lookup::Pending(receiver) => {
                        metrics::record_request_replay();
                        debug!(
                            target: "media.processor",
                            session_id = %session,
                            request_id = %request_id,
                            "Waiting for in-flight original"
                        );
                        return dedup::wait_for(receiver).await.unwrap_or_else(|| {
                            Response::failure(
                                id.clone(),
                                supplied.clone(),
                                &CoreError::Internal("original request was abandoned".to_string()),
                            )
                        });
                    }
                }
            }
            _ => None,
        };

        let label = method_label(&method);
        let session = supplied.clone().unwrap_or_default();
        let outcome = match Operation::parse(&method, params) {
            Ok(operation) => self.execute(&session, operation).await,
            Err(e) => Err(e),
        };

        // A ping without a session must not hand one out.
        let echoed_session = if supplied.is_none() && label == "ping" {
            None
        } else {
            Some(session.clone())
        };

        let response = match &outcome {
            Ok(result) => Response::success(id, echoed_session, result.clone()),
            Err(e) => Response::failure(id, echoed_session, e),
        };

        let status = match &outcome {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::record_request(label, status, started.elapsed());

        match &outcome {
            Ok(_) => debug!(
                target: "media.processor",
                session_id = %session,
                method = label,
                "Request completed"
            ),
            Err(e) => warn!(
                target: "media.processor",
                session_id = %session,
                method = label,
                error_code = e.error_code().as_str(),
                error = %e,
                "Request failed"
            ),
        }

        if let Some(guard) = guard {
            guard.complete(&response);
        }
        response
    }

    async fn execute(&self, session: &SessionId, operation: Operation) -> Result<Value, CoreError> {
        match operation {
            Operation::Ping => Ok(json!({ "value": "pong" })),
            Operation::KeepAlive => {
                self.keep_alive_session(session)?;
                Ok(json!({}))
            }
            Operation::Connect => {
                self.connect_session(session);
                Ok(json!({ "sessionId": session }))
            }
            Operation::CloseSession(params) => {
                self.close_session(session, params.release).await?;
                Ok(json!({}))
            }
            Operation::Transaction(params) => {
                let _activity = self.enter(session);
                self.transaction(session, params.operations).await
            }
            other => {
                let _activity = self.enter(session);
                self.execute_object_operation(session, other).await
            }
        }
    }

    fn enter(&self, session: &SessionId) -> ActivityGuard<'_> {
        let created = self.sessions.lock().enter(session);
        if created {
            info!(target: "media.session", session_id = %session, "Session created");
            metrics::set_sessions_active(self.sessions.count());
        }
        ActivityGuard {
            sessions: &self.sessions,
            session: session.clone(),
        }
    }

    async fn execute_object_operation(
        &self,
        session: &SessionId,
        operation: Operation,
    ) -> Result<Value, CoreError> {
        match operation {
            Operation::Create(params) => {
                let id = self.create(session, params).await?;
                Ok(json!({ "value": id }))
            }
            Operation::Invoke(params) => {
                let value = self.invoke(session, params).await?;
                Ok(json!({ "value": value }))
            }
            Operation::Ref(params) => {
                self.reference(session, &params.object)?;
                Ok(json!({}))
            }
            Operation::Unref(params) => {
                self.unref(session, &params.object).await?;
                Ok(json!({}))
            }
            Operation::Release(params) => {
                self.release(session, &params.object).await?;
                Ok(json!({ "sessionId": session }))
            }
            Operation::Describe(params) => self.describe(session, &params.object),
            Operation::Subscribe(params) => {
                let id = self.subscribe(session, &params)?;
                Ok(json!({ "value": id }))
            }
            Operation::Unsubscribe(params) => {
                self.resolve_and_touch(session, &params.object)?;
                self.dispatcher
                    .unsubscribe(&params.object, session, &params.subscription)?;
                metrics::set_subscriptions_active(self.dispatcher.subscription_count());
                Ok(json!({}))
            }
            other => Err(CoreError::InvalidParams(format!(
                "'{}' is not allowed in a transaction",
                other.method()
            ))),
        }
    }

    /// Look up `id` and record a touch for `session` under both locks.
    pub(crate) fn resolve_and_touch(
        &self,
        session: &SessionId,
        id: &ObjectId,
    ) -> Result<Arc<MediaObject>, CoreError> {
        let registry = self.registry.lock();
        let object = registry.get(id)?;
        self.sessions.lock().touch(session, id, RefStrength::Touched);
        Ok(object)
    }

    async fn create(&self, session: &SessionId, params: CreateParams) -> Result<ObjectId, CoreError> {
        self.admission.check()?;
        let (descriptor, factory) = self.types.lookup(&params.type_name)?;

        let parent = match &descriptor.parent {
            ParentRule::Root => None,
            ParentRule::Required { param, kind } => {
                let parent_id = params
                    .constructor_params
                    .get(param)
                    .and_then(Value::as_str)
                    .map(ObjectId::from)
                    .ok_or_else(|| {
                        CoreError::InvalidParams(format!(
                            "{} requires constructor parameter '{param}'",
                            descriptor.type_name
                        ))
                    })?;
                self.registry.get_of_kind(&parent_id, *kind)?;
                Some(parent_id)
            }
        };

        let id = match &parent {
            Some(parent) => ObjectId::new_child(parent, &descriptor.qualified_name),
            None => ObjectId::new_root(&descriptor.qualified_name),
        };

        let element = factory
            .construct(
                ConstructContext {
                    object_id: id.clone(),
                    parent: parent.clone(),
                    descriptor: &descriptor,
                    emitter: EventEmitter::new(id.clone(), &self.dispatcher),
                    resolver: ObjectResolver::new(&self.registry),
                },
                &params.constructor_params,
            )
            .await?;

        let object = MediaObject::new(
            id.clone(),
            Arc::clone(&descriptor),
            parent,
            Arc::clone(&element),
        );
        let stored = {
            let mut registry = self.registry.lock();
            let mut sessions = self.sessions.lock();
            registry.put(object).map(|stored| {
                sessions.touch(session, &stored.id, RefStrength::Strong);
            })
        };
        if let Err(e) = stored {
            // Parent went away while the element was being built.
            element.release().await;
            return Err(e);
        }

        metrics::set_objects_active(self.registry.size());
        info!(
            target: "media.processor",
            object_id = %id,
            type_name = %descriptor.type_name,
            session_id = %session,
            "Object created"
        );
        Ok(id)
    }

    async fn invoke(&self, session: &SessionId, params: InvokeParams) -> Result<Value, CoreError> {
        let object = self.resolve_and_touch(session, &params.object)?;

        if let Some(result) = builtin::invoke(
            &self.registry,
            &object,
            &params.operation,
            &params.operation_params,
        ) {
            return result;
        }

        let ctx = InvokeContext {
            object_id: &object.id,
            session_id: session,
            resolver: ObjectResolver::new(&self.registry),
        };
        Ok(object
            .element
            .invoke(&ctx, &params.operation, &params.operation_params)
            .await?)
    }

    fn reference(&self, session: &SessionId, id: &ObjectId) -> Result<(), CoreError> {
        let registry = self.registry.lock();
        if !registry.contains(id) {
            return Err(CoreError::MediaObjectNotFound(id.clone()));
        }
        self.sessions.lock().touch(session, id, RefStrength::Strong);
        Ok(())
    }

    async fn unref(&self, session: &SessionId, id: &ObjectId) -> Result<(), CoreError> {
        {
            let registry = self.registry.lock();
            if !registry.contains(id) {
                return Err(CoreError::MediaObjectNotFound(id.clone()));
            }
            self.sessions.lock().drop_reference(session, id);
        }
        let removed = GarbageCollector::new(&self.registry, &self.sessions).collect([id.clone()]);
        self.teardown(removed, "unreferenced").await;
        Ok(())
    }

    async fn release(&self, session: &SessionId, id: &ObjectId) -> Result<(), CoreError> {
        let targets = {
            let registry = self.registry.lock();
            if !registry.contains(id) {
                return Err(CoreError::MediaObjectNotFound(id.clone()));
            }
            let mut targets = registry.descendants(id);
            targets.push(id.clone());
            let mut sessions = self.sessions.lock();
            for target in &targets {
                sessions.drop_reference(session, target);
            }
            targets
        };
        let removed = GarbageCollector::new(&self.registry, &self.sessions).collect(targets);
        debug!(
            target: "media.processor",
            object_id = %id,
            session_id = %session,
            removed = removed.len(),
            "Object released"
        );
        self.teardown(removed, "released").await;
        Ok(())
    }

    fn describe(&self, session: &SessionId, id: &ObjectId) -> Result<Value, CoreError> {
        let object = self.resolve_and_touch(session, id)?;
        let descriptor = &object.descriptor;
        Ok(json!({
            "type": descriptor.type_name,
            "qualifiedType": descriptor.qualified_name,
            "hierarchy": descriptor.hierarchy,
        }))
    }

    fn subscribe(
        &self,
        session: &SessionId,
        params: &SubscribeParams,
    ) -> Result<common::types::SubscriptionId, CoreError> {
        self.resolve_and_touch(session, &params.object)?;
        let id = self.dispatcher.subscribe(
            &params.object,
            session,
            &params.event_type,
            &params.transport_params,
        )?;

        // The object may have been destroyed while the handler was built.
        self.ensure_still_live(&params.object)?;
        metrics::set_subscriptions_active(self.dispatcher.subscription_count());
        Ok(id)
    }

    async fn transaction(
        &self,
        session: &SessionId,
        operations: Vec<Value>,
    ) -> Result<Value, CoreError> {
        let mut refs = ForwardRefs::new();
        let mut results = Vec::with_capacity(operations.len());

        for raw in operations {
            let outcome = match split_sub_operation(raw) {
                Ok((method, params)) => {
                    let outcome = self
                        .transaction_step(session, &refs, &method, params)
                        .await;
                    if method == "create" {
                        refs.record_create(
                            outcome
                                .as_ref()
                                .ok()
                                .and_then(|result| result.get("value"))
                                .and_then(Value::as_str)
                                .map(ObjectId::from),
                        );
                    }
                    outcome
                }
                Err(e) => Err(e),
            };
            results.push(response::outcome_value(&outcome));
        }

        Ok(json!({ "value": results }))
    }

    async fn transaction_step(
        &self,
        session: &SessionId,
        refs: &ForwardRefs,
        method: &str,
        params: Value,
    ) -> Result<Value, CoreError> {
        if !allowed_in_transaction(method) {
            return Err(CoreError::InvalidParams(format!(
                "'{method}' is not allowed in a transaction"
            )));
        }
        let params = refs.substitute(params)?;
        let operation = Operation::parse(method, params)?;
        self.execute_object_operation(session, operation).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::RequestId;

    async fn create(core: &Core, session: &SessionId, type_name: &str, params: Value) -> ObjectId {
        let response = core
            .process(Request::new(session.clone(), Operation::create(type_name, params)))
            .await;
        let result = response.result.expect("create should succeed");
        ObjectId::from(result["value"].as_str().unwrap())
    }

    #[test]
    fn test_method_labels_are_bounded() {
        assert_eq!(method_label("create"), "create");
        assert_eq!(method_label("closeSession"), "closeSession");
        assert_eq!(method_label("drop_tables"), "unknown");
    }

    #[tokio::test]
    async fn test_anonymous_request_gets_a_session() {
        let core = Core::loopback_for_tests();
        let response = core
            .process(Request::anonymous(Operation::create("MediaPipeline", json!({}))))
            .await;

        assert!(response.is_success());
        let session = response.session_id.unwrap();
        assert_eq!(core.session_count(), 1);
        assert_eq!(core.sessions.references_of(&session).len(), 1);
    }

    #[tokio::test]
    async fn test_ping_does_not_create_a_session() {
        let core = Core::loopback_for_tests();
        let response = core.process(Request::anonymous(Operation::Ping)).await;

        assert_eq!(response.result.unwrap()["value"], "pong");
        assert!(response.session_id.is_none());
        assert_eq!(core.session_count(), 0);
    }

    #[tokio::test]
    async fn test_child_requires_parent_of_right_kind() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(&core, &session, "MediaPipeline", json!({})).await;
        let filter = create(&core, &session, "PassThrough", json!({"mediaPipeline": pipeline})).await;

        let missing = core
            .process(Request::new(
                session.clone(),
                Operation::create("PassThrough", json!({})),
            ))
            .await;
        assert_eq!(missing.error.unwrap().code, -32602);

        let wrong_kind = core
            .process(Request::new(
                session.clone(),
                Operation::create("PassThrough", json!({"mediaPipeline": filter})),
            ))
            .await;
        assert_eq!(wrong_kind.error.unwrap().code, 40101);
        assert_eq!(core.object_count(), 2);
    }

    #[tokio::test]
    async fn test_invoke_unknown_object_is_not_found() {
        let core = Core::loopback_for_tests();
        let response = core
            .process(Request::new(
                SessionId::new(),
                Operation::invoke(&ObjectId::from("ghost"), "getName", json!({})),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, 40101);
        assert_eq!(error.data.unwrap()["type"], "MEDIA_OBJECT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_invoke_touches_object() {
        let core = Core::loopback_for_tests();
        let (s1, s2) = (SessionId::new(), SessionId::new());
        let pipeline = create(&core, &s1, "MediaPipeline", json!({})).await;

        core.process(Request::new(
            s2.clone(),
            Operation::invoke(&pipeline, "getName", json!({})),
        ))
        .await;

        assert_eq!(
            core.sessions.references_of(&s2),
            vec![(pipeline, RefStrength::Touched)]
        );
    }

    #[tokio::test]
    async fn test_unref_collects_subtree() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(&core, &session, "MediaPipeline", json!({})).await;
        let filter = create(&core, &session, "PassThrough", json!({"mediaPipeline": pipeline})).await;

        // The child still holds the pipeline up.
        core.process(Request::new(session.clone(), Operation::unref(&pipeline)))
            .await;
        assert!(core.contains_object(&pipeline));

        core.process(Request::new(session.clone(), Operation::unref(&filter)))
            .await;
        assert!(!core.contains_object(&filter));
        assert!(!core.contains_object(&pipeline));
        assert_eq!(core.object_count(), 0);
    }

    #[tokio::test]
    async fn test_release_returns_session_and_cascades() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(&core, &session, "MediaPipeline", json!({})).await;
        create(&core, &session, "PassThrough", json!({"mediaPipeline": pipeline})).await;

        let response = core
            .process(Request::new(session.clone(), Operation::release(&pipeline)))
            .await;
        assert_eq!(response.result.unwrap()["sessionId"], session.as_str());
        assert_eq!(core.object_count(), 0);
    }

    #[tokio::test]
    async fn test_release_keeps_objects_other_sessions_hold() {
        let core = Core::loopback_for_tests();
        let (s1, s2) = (SessionId::new(), SessionId::new());
        let pipeline = create(&core, &s1, "MediaPipeline", json!({})).await;
        core.process(Request::new(s2.clone(), Operation::reference(&pipeline)))
            .await;

        core.process(Request::new(s1.clone(), Operation::release(&pipeline)))
            .await;
        assert!(core.contains_object(&pipeline));
    }

    #[tokio::test]
    async fn test_describe_reports_type_metadata() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let pipeline = create(&core, &session, "MediaPipeline", json!({})).await;
        let filter = create(&core, &session, "PassThrough", json!({"mediaPipeline": pipeline})).await;

        let response = core
            .process(Request::new(session, Operation::describe(&filter)))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["type"], "PassThrough");
        assert_eq!(result["qualifiedType"], "kurento.PassThrough");
        assert_eq!(result["hierarchy"][0], "kurento.Filter");
    }

    #[tokio::test]
    async fn test_transaction_resolves_forward_references() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let operations = vec![
            Operation::create("MediaPipeline", json!({})).to_value(),
            Operation::create("PassThrough", json!({"mediaPipeline": "newref:0"})).to_value(),
            Operation::create("PassThrough", json!({"mediaPipeline": "newref:0"})).to_value(),
            Operation::invoke(
                &ObjectId::from("newref:1"),
                "connect",
                json!({"sink": "newref:2"}),
            )
            .to_value(),
            Operation::invoke(&ObjectId::from("newref:1"), "getSinkConnections", json!({}))
                .to_value(),
        ];

        let response = core
            .process(Request::new(session, Operation::transaction(operations)))
            .await;
        let results = response.result.unwrap()["value"].clone();
        let entries = results.as_array().unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|r| r.get("result").is_some()), "{results:?}");

        let second = results[2]["result"]["value"].clone();
        assert_eq!(results[4]["result"]["value"], json!([second]));
        assert_eq!(core.object_count(), 3);
    }

    #[tokio::test]
    async fn test_transaction_reports_failures_without_rollback() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let operations = vec![
            Operation::create("MediaPipeline", json!({})).to_value(),
            Operation::create("NoSuchType", json!({})).to_value(),
            Operation::create("PassThrough", json!({"mediaPipeline": "newref:1"})).to_value(),
            json!({"method": "closeSession"}),
        ];

        let response = core
            .process(Request::new(session, Operation::transaction(operations)))
            .await;
        assert!(response.is_success());
        let results = response.result.unwrap()["value"].clone();

        assert!(results[0].get("result").is_some());
        assert_eq!(results[1]["error"]["code"], -32601);
        assert_eq!(results[2]["error"]["data"]["type"], "UNRESOLVED_REFERENCE");
        assert_eq!(results[3]["error"]["code"], -32602);
        assert_eq!(core.object_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_replays_without_second_side_effect() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();
        let request = Request::new(session, Operation::create("MediaPipeline", json!({})))
            .with_id(RequestId::Number(42));

        let first = core.process(request.clone()).await;
        let second = core.process(request).await;

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(core.object_count(), 1);
    }

    #[tokio::test]
    async fn test_requests_without_session_are_not_cached() {
        let core = Core::loopback_for_tests();
        let request = Request::anonymous(Operation::create("MediaPipeline", json!({})))
            .with_id(RequestId::Number(1));

        core.process(request.clone()).await;
        core.process(request).await;
        assert_eq!(core.object_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_method_is_an_error_response() {
        let core = Core::loopback_for_tests();
        let request = Request {
            id: Some(RequestId::Number(1)),
            session_id: Some(SessionId::new()),
            method: "frobnicate".to_string(),
            params: Value::Null,
        };
        let response = core.process(request).await;
        assert_eq!(response.error.unwrap().code, -32601);
        assert_eq!(response.id, Some(RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_keep_alive_requires_known_session() {
        let core = Core::loopback_for_tests();
        let session = SessionId::new();

        let unknown = core
            .process(Request::new(session.clone(), Operation::KeepAlive))
            .await;
        assert_eq!(unknown.error.unwrap().code, 40102);

        core.process(Request::new(session.clone(), Operation::Connect))
            .await;
        let known = core.process(Request::new(session, Operation::KeepAlive)).await;
        assert!(known.is_success());
    }

    #[tokio::test]
    async fn test_connect_mints_session() {
        let core = Core::loopback_for_tests();
        let response = core.process(Request::anonymous(Operation::Connect)).await;
        let session = response.session_id.clone().unwrap();
        assert_eq!(response.result.unwrap()["sessionId"], session.as_str());
        assert_eq!(core.session_count(), 1);
    }
}
