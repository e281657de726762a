//! Request cache eviction.
//!
//! Periodically drops cached responses older than the retention window so
//! the retry cache stays bounded.

use crate::core::Core;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Start the request cache eviction task.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "media.task.request_cache_eviction")]
pub async fn start_request_cache_eviction(
    core: Arc<Core>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "media.task.request_cache_eviction",
        interval_seconds = interval.as_secs(),
        retention_seconds = core.config().request_cache_retention.as_secs(),
        "Starting request cache eviction task"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = core.evict_request_cache();
                if evicted > 0 {
                    debug!(
                        target: "media.task.request_cache_eviction",
                        evicted_count = evicted,
                        "Evicted expired responses"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "media.task.request_cache_eviction",
                    "Request cache eviction received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(
        target: "media.task.request_cache_eviction",
        "Request cache eviction stopped"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::core::CoreBuilder;
    use crate::processor::{Operation, Request};
    use common::types::SessionId;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_expired_request_executes_again() {
        let core = CoreBuilder::new(CoreConfig {
            request_cache_retention: Duration::from_secs(10),
            ..CoreConfig::default()
        })
        .with_loopback_types()
        .build();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(start_request_cache_eviction(
            Arc::clone(&core),
            Duration::from_secs(1),
            cancel_token.clone(),
        ));

        let request = Request::new(
            SessionId::new(),
            Operation::create("MediaPipeline", json!({})),
        )
        .with_id(7_i64);

        core.process(request.clone()).await;
        core.process(request.clone()).await;
        assert_eq!(core.object_count(), 1);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(core.cache.is_empty());

        core.process(request).await;
        assert_eq!(core.object_count(), 2);

        cancel_token.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(2), handle).await.is_ok());
    }
}
