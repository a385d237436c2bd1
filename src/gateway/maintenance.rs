//! Background maintenance loops.
//!
//! Three independent tasks share one cancellation token:
//!
//! - health probing every `health_check_interval`
//! - requests-per-minute roll-up every `metrics_rollup_interval`
//! - pruning of expired rate-limit timestamps and cache entries every `cleanup_interval`
//!
//! None of them is needed for correctness of the request path; the rate limiter and
//! the cache both prune lazily on access.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::caching::ResponseCache;
use crate::core::config::GatewaySettings;
use crate::observability::{HealthMonitor, MetricsCollector};
use crate::traffic::RateLimiter;

/// Handles to the running maintenance tasks
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) fn spawn(
        monitor: HealthMonitor,
        metrics: Arc<MetricsCollector>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        settings: &GatewaySettings,
    ) -> Self {
        let cancel = CancellationToken::new();

        let rollup = every(settings.metrics_rollup_interval, cancel.clone(), move || {
            let metrics = metrics.clone();
            async move {
                let rpm = metrics.rollup();
                debug!(requests_per_minute = rpm, "Metrics rolled up");
            }
        });

        let cleanup = every(settings.cleanup_interval, cancel.clone(), move || {
            let limiter = limiter.clone();
            let cache = cache.clone();
            async move {
                let timestamps = limiter.prune_expired();
                let entries = cache.purge_expired().await;
                debug!(timestamps, entries, "Expired state pruned");
            }
        });

        let handles = vec![
            tokio::spawn(monitor.run(cancel.clone())),
            tokio::spawn(rollup),
            tokio::spawn(cleanup),
        ];

        info!(tasks = handles.len(), "Background maintenance started");
        Self { cancel, handles }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop every loop and wait for in-flight rounds to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Background maintenance stopped");
    }
}

/// Run `tick` on every interval until cancelled. The first tick fires after one period.
async fn every<F, Fut>(period: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => tick().await,
        }
    }
}
