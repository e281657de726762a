//! Observability for the media controller.
//!
//! # Privacy by Default
//!
//! Request entry points use `#[instrument(skip_all)]` with explicit fields.
//! Parameters and engine payloads are never logged.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `media_objects_active` | Gauge | none | Live media objects |
//! | `media_sessions_active` | Gauge | none | Live sessions |
//! | `media_subscriptions_active` | Gauge | none | Live subscriptions |
//! | `media_requests_total` | Counter | `method`, `status` | Processed requests |
//! | `media_request_duration_seconds` | Histogram | `method` | Request latency |
//! | `media_request_replays_total` | Counter | none | Responses served from the request cache |
//! | `media_objects_collected_total` | Counter | `reason` | Objects removed from the registry |
//! | `media_admission_rejected_total` | Counter | none | Constructions refused by admission control |
//! | `media_events_delivered_total` | Counter | none | Event deliveries (one per handler) |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
