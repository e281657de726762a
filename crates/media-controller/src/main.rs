//! Media Controller
//!
//! Control-plane server for media objects.
//!
//! # Servers
//!
//! - HTTP server for JSON requests (default: 0.0.0.0:8888)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the core with the loopback engine types
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start request HTTP server
//! 7. Spawn the session sweeper and request-cache eviction tasks
//! 8. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use media_controller::admission::SystemProbe;
use media_controller::config::{AdmissionProbeKind, Config};
use media_controller::core::CoreBuilder;
use media_controller::observability::{health_router, init_metrics_recorder, HealthState};
use media_controller::tasks::{start_request_cache_eviction, start_session_sweeper};
use media_controller::transport::{rpc_router, LogHandlerFactory};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it decides the log format
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_filter.as_str()));
    let subscriber = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Media Controller");
    info!(
        controller_id = %config.controller_id,
        rpc_bind_address = %config.rpc_bind_address,
        health_bind_address = %config.health_bind_address,
        session_ttl_seconds = config.session_ttl_seconds,
        request_cache_retention_seconds = config.request_cache_retention_seconds,
        resource_limit = config.resource_limit,
        admission_probe = ?config.admission_probe,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let builder = CoreBuilder::new(config.core_config()).with_loopback_types();
    let builder = match config.admission_probe {
        AdmissionProbeKind::System => builder.probe(Arc::new(SystemProbe::new())),
        AdmissionProbeKind::Objects => builder.object_capacity(config.max_objects),
    };
    let core = builder.build();
    core.set_event_subscription_handler(Arc::new(LogHandlerFactory));

    let health_state = Arc::new(HealthState::new(Arc::clone(&core)));
    let shutdown_token = CancellationToken::new();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let rpc_addr: SocketAddr = config.rpc_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.rpc_bind_address, "Invalid request bind address");
        format!("Invalid request bind address: {e}")
    })?;
    let rpc_listener = tokio::net::TcpListener::bind(rpc_addr).await.map_err(|e| {
        error!(error = %e, addr = %rpc_addr, "Failed to bind request server");
        format!("Failed to bind request server to {rpc_addr}: {e}")
    })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let rpc_shutdown_token = shutdown_token.child_token();
    let rpc_app = rpc_router(Arc::clone(&core));
    tokio::spawn(async move {
        info!(addr = %rpc_addr, "Request server starting");
        let server = axum::serve(rpc_listener, rpc_app).with_graceful_shutdown(async move {
            rpc_shutdown_token.cancelled().await;
            info!("Request server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Request server failed");
        }
    });

    let sweeper_handle = tokio::spawn(start_session_sweeper(
        Arc::clone(&core),
        Duration::from_secs(config.session_sweep_interval_seconds),
        shutdown_token.child_token(),
    ));
    let eviction_handle = tokio::spawn(start_request_cache_eviction(
        Arc::clone(&core),
        Duration::from_secs(config.request_cache_eviction_interval_seconds),
        shutdown_token.child_token(),
    ));

    health_state.set_ready();
    info!("Media Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_not_ready();
    shutdown_token.cancel();

    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Session sweeper task panicked");
    }
    if let Err(e) = eviction_handle.await {
        error!(error = %e, "Request cache eviction task panicked");
    }

    core.shutdown().await;

    info!("Media Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
