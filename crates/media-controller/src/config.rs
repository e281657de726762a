//! Media controller configuration.
//!
//! Configuration is loaded from environment variables. [`Config`] is the
//! process-level view used by the binary; [`CoreConfig`] is the subset the
//! library core needs and can be built directly in tests.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default bind address for the JSON request endpoint.
pub const DEFAULT_RPC_BIND_ADDRESS: &str = "0.0.0.0:8888";

/// Default idle TTL before a session is swept.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 120;

/// Default interval between idle-session sweeps.
pub const DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS: u64 = 10;

/// Default retention of cached responses for retried requests.
pub const DEFAULT_REQUEST_CACHE_RETENTION_SECONDS: u64 = 30;

/// Default interval between request-cache evictions.
pub const DEFAULT_REQUEST_CACHE_EVICTION_INTERVAL_SECONDS: u64 = 5;

/// Default admission ceiling (fraction of capacity).
pub const DEFAULT_RESOURCE_LIMIT: f64 = 0.8;

/// Default capacity used by the object-count admission probe.
pub const DEFAULT_MAX_OBJECTS: usize = 10_000;

/// Default controller instance ID prefix.
pub const DEFAULT_CONTROLLER_ID_PREFIX: &str = "media";

/// Which resource-cost proxy admission control samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionProbeKind {
    /// Live objects divided by `max_objects`.
    Objects,
    /// Host CPU / memory usage.
    System,
}

impl AdmissionProbeKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "objects" => Ok(AdmissionProbeKind::Objects),
            "system" => Ok(AdmissionProbeKind::System),
            other => Err(ConfigError::InvalidValue(format!(
                "MEDIA_ADMISSION_PROBE must be 'objects' or 'system', got '{other}'"
            ))),
        }
    }
}

/// Settings consumed by the core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Idle time after which a session is closed by the sweeper.
    pub session_ttl: Duration,
    /// How long a completed response stays replayable.
    pub request_cache_retention: Duration,
    /// Admission ceiling as a fraction of capacity (0.0..=1.0).
    pub resource_limit: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            request_cache_retention: Duration::from_secs(DEFAULT_REQUEST_CACHE_RETENTION_SECONDS),
            resource_limit: DEFAULT_RESOURCE_LIMIT,
        }
    }
}

/// Media controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// JSON request endpoint bind address (default: "0.0.0.0:8888").
    pub rpc_bind_address: String,

    /// Unique identifier for this controller instance.
    pub controller_id: String,

    /// Idle session TTL in seconds.
    pub session_ttl_seconds: u64,

    /// Interval between idle-session sweeps in seconds.
    pub session_sweep_interval_seconds: u64,

    /// Retention of cached responses in seconds.
    pub request_cache_retention_seconds: u64,

    /// Interval between request-cache evictions in seconds.
    pub request_cache_eviction_interval_seconds: u64,

    /// Admission ceiling as a fraction of capacity.
    pub resource_limit: f64,

    /// Capacity for the object-count probe.
    pub max_objects: usize,

    /// Admission probe selection.
    pub admission_probe: AdmissionProbeKind,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let health_bind_address = vars
            .get("MEDIA_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let rpc_bind_address = vars
            .get("MEDIA_RPC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RPC_BIND_ADDRESS.to_string());

        let session_ttl_seconds = parse_positive(
            vars,
            "MEDIA_SESSION_TTL_SECONDS",
            DEFAULT_SESSION_TTL_SECONDS,
        )?;

        let session_sweep_interval_seconds = parse_positive(
            vars,
            "MEDIA_SESSION_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS,
        )?;

        let request_cache_retention_seconds = parse_positive(
            vars,
            "MEDIA_REQUEST_CACHE_RETENTION_SECONDS",
            DEFAULT_REQUEST_CACHE_RETENTION_SECONDS,
        )?;

        let request_cache_eviction_interval_seconds = parse_positive(
            vars,
            "MEDIA_REQUEST_CACHE_EVICTION_INTERVAL_SECONDS",
            DEFAULT_REQUEST_CACHE_EVICTION_INTERVAL_SECONDS,
        )?;

        let resource_limit = match vars.get("MEDIA_RESOURCE_LIMIT") {
            Some(raw) => {
                let value: f64 = raw.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("MEDIA_RESOURCE_LIMIT is not a number: '{raw}'"))
                })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigError::InvalidValue(format!(
                        "MEDIA_RESOURCE_LIMIT must be within 0.0..=1.0, got {value}"
                    )));
                }
                value
            }
            None => DEFAULT_RESOURCE_LIMIT,
        };

        let max_objects = vars
            .get("MEDIA_MAX_OBJECTS")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_OBJECTS);

        let admission_probe = match vars.get("MEDIA_ADMISSION_PROBE") {
            Some(raw) => AdmissionProbeKind::parse(raw)?,
            None => AdmissionProbeKind::Objects,
        };

        let json_logs = vars
            .get("MEDIA_LOG_JSON")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"));

        // Generate controller instance ID
        let controller_id = vars.get("MEDIA_CONTROLLER_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_CONTROLLER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            health_bind_address,
            rpc_bind_address,
            controller_id,
            session_ttl_seconds,
            session_sweep_interval_seconds,
            request_cache_retention_seconds,
            request_cache_eviction_interval_seconds,
            resource_limit,
            max_objects,
            admission_probe,
            observability: ObservabilityConfig {
                json_logs,
                ..ObservabilityConfig::default()
            },
        })
    }

    /// Settings handed to the core.
    #[must_use]
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            session_ttl: Duration::from_secs(self.session_ttl_seconds),
            request_cache_retention: Duration::from_secs(self.request_cache_retention_seconds),
            resource_limit: self.resource_limit,
        }
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue(format!(
                "{name} must be a positive integer, got '{raw}'"
            ))),
            Ok(value) => Ok(value),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.rpc_bind_address, DEFAULT_RPC_BIND_ADDRESS);
        assert_eq!(config.session_ttl_seconds, DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(
            config.session_sweep_interval_seconds,
            DEFAULT_SESSION_SWEEP_INTERVAL_SECONDS
        );
        assert_eq!(
            config.request_cache_retention_seconds,
            DEFAULT_REQUEST_CACHE_RETENTION_SECONDS
        );
        assert!((config.resource_limit - DEFAULT_RESOURCE_LIMIT).abs() < f64::EPSILON);
        assert_eq!(config.max_objects, DEFAULT_MAX_OBJECTS);
        assert_eq!(config.admission_probe, AdmissionProbeKind::Objects);
        assert!(!config.observability.json_logs);
        // Controller ID should be auto-generated
        assert!(config.controller_id.starts_with("media-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            (
                "MEDIA_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9090".to_string(),
            ),
            (
                "MEDIA_RPC_BIND_ADDRESS".to_string(),
                "127.0.0.1:9999".to_string(),
            ),
            ("MEDIA_CONTROLLER_ID".to_string(), "media-test-1".to_string()),
            ("MEDIA_SESSION_TTL_SECONDS".to_string(), "45".to_string()),
            (
                "MEDIA_SESSION_SWEEP_INTERVAL_SECONDS".to_string(),
                "3".to_string(),
            ),
            (
                "MEDIA_REQUEST_CACHE_RETENTION_SECONDS".to_string(),
                "90".to_string(),
            ),
            ("MEDIA_RESOURCE_LIMIT".to_string(), "0.5".to_string()),
            ("MEDIA_MAX_OBJECTS".to_string(), "200".to_string()),
            ("MEDIA_ADMISSION_PROBE".to_string(), "system".to_string()),
            ("MEDIA_LOG_JSON".to_string(), "true".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, "127.0.0.1:9090");
        assert_eq!(config.rpc_bind_address, "127.0.0.1:9999");
        assert_eq!(config.controller_id, "media-test-1");
        assert_eq!(config.session_ttl_seconds, 45);
        assert_eq!(config.session_sweep_interval_seconds, 3);
        assert_eq!(config.request_cache_retention_seconds, 90);
        assert!((config.resource_limit - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.max_objects, 200);
        assert_eq!(config.admission_probe, AdmissionProbeKind::System);
        assert!(config.observability.json_logs);

        let core = config.core_config();
        assert_eq!(core.session_ttl, Duration::from_secs(45));
        assert_eq!(core.request_cache_retention, Duration::from_secs(90));
    }

    #[test]
    fn test_resource_limit_out_of_range_rejected() {
        let vars = HashMap::from([("MEDIA_RESOURCE_LIMIT".to_string(), "1.5".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let vars = HashMap::from([("MEDIA_SESSION_TTL_SECONDS".to_string(), "0".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("MEDIA_SESSION_TTL_SECONDS"))
        );
    }

    #[test]
    fn test_unknown_probe_rejected() {
        let vars = HashMap::from([("MEDIA_ADMISSION_PROBE".to_string(), "gpu".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
