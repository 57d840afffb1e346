use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::job::StartError;
use super::runner::Collector;

/// Trigger a collection run every `every` until shutdown.
///
/// A tick that finds a run still in progress is dropped, not queued.
pub async fn run_scheduler(
    collector: Collector,
    every: Duration,
    run_on_startup: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick completes immediately
    if !run_on_startup {
        ticker.tick().await;
    }

    tracing::info!(interval = ?every, run_on_startup, "Collection scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match collector.trigger().await {
                    Ok(run_id) => tracing::debug!(%run_id, "Scheduled collection run started"),
                    Err(StartError::AlreadyRunning) => {
                        tracing::debug!("Collection run still in progress, skipping scheduled tick");
                    }
                }
            }
            // The watch::Ref guard is not Send; drop it before leaving the arm
            _ = async { let _ = shutdown_rx.wait_for(|&v| v).await; } => {
                tracing::info!("Collection scheduler shutting down");
                break;
            }
        }
    }
}
