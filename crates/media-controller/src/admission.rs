//! Admission control.
//!
//! Before every `create` the controller samples a resource-cost proxy and
//! refuses the construction once usage exceeds the configured ceiling. The
//! check never blocks or retries; existing objects are unaffected.

use crate::errors::CoreError;
use crate::observability::metrics;
use crate::system_info::SystemSampler;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Source of the current resource usage, as a fraction of capacity.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> f64;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Usage = live objects / capacity.
pub struct ObjectCountProbe {
    live: Arc<AtomicUsize>,
    capacity: usize,
}

impl ObjectCountProbe {
    #[must_use]
    pub fn new(live: Arc<AtomicUsize>, capacity: usize) -> Self {
        Self {
            live,
            capacity: capacity.max(1),
        }
    }
}

impl ResourceProbe for ObjectCountProbe {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&self) -> f64 {
        self.live.load(Ordering::Relaxed) as f64 / self.capacity as f64
    }

    fn name(&self) -> &'static str {
        "objects"
    }
}

/// Usage = max(cpu, memory) of the host.
#[derive(Default)]
pub struct SystemProbe {
    sampler: Mutex<SystemSampler>,
}

impl SystemProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> f64 {
        self.sampler.lock().sample().peak()
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Constant usage.
pub struct FixedProbe(pub f64);

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> f64 {
        self.0
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Compares a probe sample against a ceiling.
pub struct AdmissionController {
    probe: Arc<dyn ResourceProbe>,
    limit: f64,
}

impl AdmissionController {
    #[must_use]
    pub fn new(probe: Arc<dyn ResourceProbe>, limit: f64) -> Self {
        Self { probe, limit }
    }

    #[must_use]
    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// Fail with `NotEnoughResources` if usage is over the limit.
    pub fn check(&self) -> Result<(), CoreError> {
        let usage = self.probe.sample();
        if usage > self.limit {
            metrics::record_admission_rejected();
            warn!(
                target: "media.admission",
                probe = self.probe.name(),
                usage,
                limit = self.limit,
                "Construction rejected by admission control"
            );
            return Err(CoreError::NotEnoughResources {
                usage,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
