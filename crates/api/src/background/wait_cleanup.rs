//! Periodic cleanup of aged wait instances.
//!
//! A notification that never arrives (caller gave up, record purged by
//! an operator, version skew) would otherwise leak its wait instance
//! forever. This task removes instances past a generous age ceiling on
//! a fixed interval using `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use relay_core::clock::Clock;
use relay_core::wait::WaitRegistry;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;

/// Run the wait-instance cleanup loop until `cancel` is triggered.
pub async fn run(
    waits: Arc<WaitRegistry>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
    cancel: CancellationToken,
) {
    let max_age = chrono::Duration::seconds(config.wait_ttl_secs);
    tracing::info!(
        wait_ttl_secs = config.wait_ttl_secs,
        interval_secs = config.wait_cleanup_interval_secs,
        "Wait cleanup job started",
    );

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.wait_cleanup_interval_secs));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Wait cleanup job stopping");
                break;
            }
            _ = interval.tick() => {
                let purged = waits.purge_older_than(max_age, clock.now()).await;
                if purged > 0 {
                    tracing::info!(purged, "Wait cleanup: removed aged wait instances");
                } else {
                    tracing::debug!("Wait cleanup: nothing to remove");
                }
            }
        }
    }
}
