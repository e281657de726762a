//! Idle session sweeper.
//!
//! Periodically closes (non-forced) every session whose last activity is
//! older than the configured TTL. Sessions with a request in flight are
//! skipped until that request finishes.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered, after finishing
//! the sweep in progress.

use crate::core::Core;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Start the idle session sweeper.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "media.task.session_sweeper")]
pub async fn start_session_sweeper(
    core: Arc<Core>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "media.task.session_sweeper",
        interval_seconds = interval.as_secs(),
        ttl_seconds = core.config().session_ttl.as_secs(),
        "Starting session sweeper task"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&core).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "media.task.session_sweeper",
                    "Session sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "media.task.session_sweeper", "Session sweeper stopped");
}

/// Run a single sweep.
pub(crate) async fn run_sweep(core: &Core) -> usize {
    let closed = core.sweep_idle_sessions().await;
    if closed > 0 {
        info!(
            target: "media.task.session_sweeper",
            closed_count = closed,
            remaining = core.session_count(),
            "Closed idle sessions"
        );
    }
    closed
}
