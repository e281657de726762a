//! JSON-over-HTTP transport.
//!
//! - `POST /rpc` - one request in, one response out. The response carries
//!   the session the request ran in, so clients without a session get one
//!   minted and must send it back on later calls.
//! - `GET /objects` - diagnostic snapshot of the object tree
//!
//! HTTP cannot push, so `subscribe` over `/rpc` returns a subscription id but
//! matching events only reach the server log through `LogHandlerFactory`.

use crate::core::{Core, ObjectSnapshot};
use crate::processor::{Request, Response};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the request router.
pub fn rpc_router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/objects", get(list_objects))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

async fn handle_rpc(State(core): State<Arc<Core>>, Json(request): Json<Request>) -> Json<Response> {
    Json(core.process(request).await)
}

async fn list_objects(State(core): State<Arc<Core>>) -> Json<Vec<ObjectSnapshot>> {
    Json(core.snapshot())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = axum::http::Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = app.oneshot(request).await.expect("Failed to execute request");
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_rpc_mints_session_and_creates_object() {
        let core = Core::loopback_for_tests();
        let (status, body) = call(
            rpc_router(Arc::clone(&core)),
            Method::POST,
            "/rpc",
            Some(json!({
                "id": 1,
                "method": "create",
                "params": {"type": "MediaPipeline"}
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 1);
        assert!(body["sessionId"].is_string());
        assert!(body["result"]["value"].is_string());
        assert_eq!(core.object_count(), 1);

        let (status, objects) =
            call(rpc_router(core), Method::GET, "/objects", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(objects[0]["type"], "kurento.MediaPipeline");
        assert_eq!(objects[0]["holders"][0]["strength"], "strong");
    }

    #[tokio::test]
    async fn test_rpc_errors_are_responses() {
        let core = Core::loopback_for_tests();
        let (status, body) = call(
            rpc_router(core),
            Method::POST,
            "/rpc",
            Some(json!({
                "sessionId": "s",
                "method": "invoke",
                "params": {"object": "ghost", "operation": "getName"}
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], 40101);
        assert_eq!(body["sessionId"], "s");
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let core = Core::loopback_for_tests();
        let (status, _) = call(
            rpc_router(core),
            Method::POST,
            "/rpc",
            Some(json!({"params": {}})),
        )
        .await;
        assert!(status.is_client_error());
    }
}
