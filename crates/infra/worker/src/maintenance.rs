//! Periodic dead-letter retention sweep.

use chrono::Utc;
use marketplace_reliability::DeadLetterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Purges expired dead letters every `interval` until `shutdown` fires.
///
/// Returns the total number of purged records.
pub async fn run_retention_sweep(
    store: Arc<dyn DeadLetterStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> usize {
    let mut purged_total = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(purged_total, "Retention sweep stopped");
                return purged_total;
            }

            _ = tokio::time::sleep(interval) => {}
        }

        match store.purge_expired(Utc::now()).await {
            Ok(0) => debug!("No expired dead letters"),
            Ok(purged) => {
                purged_total += purged;
                match store.get_dead_letter_statistics().await {
                    Ok(stats) => info!(
                        purged,
                        remaining = stats.total_messages,
                        "Retention sweep completed"
                    ),
                    Err(e) => info!(purged, error = %e, "Retention sweep completed, statistics unavailable"),
                }
            }
            Err(e) => error!(error = %e, "Retention sweep failed"),
        }
    }
}
