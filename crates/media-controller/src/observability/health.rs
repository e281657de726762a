//! Health endpoints for the media controller.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe; 200 with a JSON status body while
//!   accepting requests, 503 otherwise
//!
//! The `/metrics` endpoint is mounted separately by the binary.

use crate::core::{Core, CoreStatus};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags plus the core they report on.
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
    core: Arc<Core>,
}

impl HealthState {
    /// Live, not yet ready.
    #[must_use]
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            core,
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> Result<Json<CoreStatus>, StatusCode> {
    if state.is_ready() {
        Ok(Json(state.core.status()))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
