use std::sync::Arc;
use std::time::Duration;

use crate::ws::registry::DelegateRegistry;

/// Interval between heartbeat pings (in seconds).
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that sends periodic Ping frames to every
/// connected delegate.
///
/// Dead connections surface as send/receive errors in their own stream
/// tasks, which then clean up their registry slots. The returned
/// `JoinHandle` is aborted during shutdown.
pub fn start_heartbeat(registry: Arc<DelegateRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));

        loop {
            interval.tick().await;
            let count = registry.connection_count().await;
            tracing::debug!(count, "Delegate heartbeat ping");
            registry.ping_all().await;
        }
    })
}
