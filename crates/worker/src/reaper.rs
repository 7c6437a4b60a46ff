//! Periodic recovery of jobs abandoned by crashed workers.
//!
//! A worker that dies mid-job leaves its row `RUNNING` forever. This loop
//! fails every `RUNNING` job whose claim is older than `stale_after`, which
//! is the only other legal transition out of `RUNNING`. Quota is not
//! refunded for reaped jobs.

use std::sync::Arc;
use std::time::Duration;

use adcraft_db::store::JobStore;
use tokio_util::sync::CancellationToken;

/// Run the stale-job reaper until `cancel` is triggered.
pub async fn run(
    store: Arc<dyn JobStore>,
    stale_after: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        stale_after_secs = stale_after.as_secs(),
        interval_secs = interval.as_secs(),
        "Stale job reaper started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale job reaper stopping");
                break;
            }
            _ = ticker.tick() => {
                match store.fail_stale(stale_after).await {
                    Ok(failed) if failed > 0 => {
                        tracing::warn!(failed, "Stale job reaper: failed abandoned jobs");
                    }
                    Ok(_) => {
                        tracing::debug!("Stale job reaper: nothing to recover");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stale job reaper: sweep failed");
                    }
                }
            }
        }
    }
}
