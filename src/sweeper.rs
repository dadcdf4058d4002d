//! Periodic removal of pending entries whose invoices were never paid.

use lnpaywall_types::table::PaymentTable;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns a task dropping pending entries older than `ttl` until `cancellation` fires.
pub fn spawn_pending_sweeper(
    table: PaymentTable,
    ttl: Duration,
    cancellation: CancellationToken,
) -> JoinHandle<()> {
    let period = ttl.min(MAX_SWEEP_INTERVAL).max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = interval.tick() => {
                    let removed = table.prune_pending(ttl);
                    if removed > 0 {
                        tracing::info!(removed, ttl_secs = ttl.as_secs(), "Pruned expired pending payments");
                    }
                }
            }
        }
        tracing::debug!("Pending sweeper stopped");
    })
}
